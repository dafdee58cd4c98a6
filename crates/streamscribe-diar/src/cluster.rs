//! Agglomerative speaker clustering over embedding frames.

use crate::analyzer::EmbeddingFrame;

/// A speaker cluster. IDs are assigned in order of first appearance in
/// the frame history; the mapping to a human identity is meaningless
/// beyond the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerCluster {
    pub id: u32,
    /// Count-weighted mean of member embeddings, unit norm.
    pub centroid: Vec<f32>,
    pub member_count: usize,
    pub last_seen_ms: i64,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    dot / (na * nb)
}

struct WorkCluster {
    centroid: Vec<f32>,
    count: usize,
    /// Index of the earliest frame this cluster contains; drives both
    /// the tie-break and the final ID ordering.
    earliest: usize,
    last_seen_ms: i64,
    members: Vec<usize>,
}

/// Cluster `frames` into at most `max_speakers` clusters by cosine
/// similarity, writing `speaker_id` and `confidence` back into each
/// frame. `threshold` is a cosine distance: pairs closer than it are
/// merged; once only dissimilar clusters remain, merging continues on
/// the closest pairs only while the count still exceeds `max_speakers`.
///
/// Deterministic for a given input: re-running on the same frames with
/// the same parameters yields identical assignments.
pub fn cluster_frames(
    frames: &mut [EmbeddingFrame],
    max_speakers: usize,
    threshold: f32,
) -> Vec<SpeakerCluster> {
    if frames.is_empty() || max_speakers == 0 {
        return Vec::new();
    }

    let merge_sim = 1.0 - threshold;
    let mut clusters: Vec<WorkCluster> = frames
        .iter()
        .enumerate()
        .map(|(i, f)| WorkCluster {
            centroid: f.vector.clone(),
            count: 1,
            earliest: i,
            last_seen_ms: f.t_end_ms,
            members: vec![i],
        })
        .collect();

    while clusters.len() > 1 {
        // Highest-similarity pair; equal similarity resolves to the
        // pair containing the earliest frame.
        let mut best: Option<(usize, usize, f32)> = None;
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                let sim = cosine_similarity(&clusters[i].centroid, &clusters[j].centroid);
                let better = match best {
                    None => true,
                    Some((bi, bj, bsim)) => {
                        sim > bsim
                            || (sim == bsim
                                && clusters[i].earliest.min(clusters[j].earliest)
                                    < clusters[bi].earliest.min(clusters[bj].earliest))
                    }
                };
                if better {
                    best = Some((i, j, sim));
                }
            }
        }

        let Some((i, j, sim)) = best else { break };
        let over_capacity = clusters.len() > max_speakers;
        if sim < merge_sim && !over_capacity {
            break;
        }

        let removed = clusters.remove(j);
        let target = &mut clusters[i];
        let total = target.count + removed.count;
        for (c, r) in target.centroid.iter_mut().zip(removed.centroid.iter()) {
            *c = (*c * target.count as f32 + *r * removed.count as f32) / total as f32;
        }
        crate::embedder::l2_normalize(&mut target.centroid);
        target.count = total;
        target.earliest = target.earliest.min(removed.earliest);
        target.last_seen_ms = target.last_seen_ms.max(removed.last_seen_ms);
        target.members.extend(removed.members);
    }

    // Stable IDs: 0..K-1 in order of the earliest frame each cluster
    // contains, independent of merge order.
    clusters.sort_by_key(|c| c.earliest);

    let mut result = Vec::with_capacity(clusters.len());
    for (id, work) in clusters.into_iter().enumerate() {
        let id = id as u32;
        for &m in &work.members {
            frames[m].speaker_id = Some(id);
            frames[m].confidence =
                cosine_similarity(&frames[m].vector, &work.centroid).clamp(0.0, 1.0);
        }
        result.push(SpeakerCluster {
            id,
            centroid: work.centroid,
            member_count: work.count,
            last_seen_ms: work.last_seen_ms,
        });
    }

    result
}
