//! Hierarchical community detection over a tenant's knowledge graph
//! (§4.10, component I).
//!
//! The upstream implementation delegates to `python-louvain`/`leidenalg`;
//! no equivalent crate exists in this corpus, so communities are found with
//! a hand-rolled single-phase local-moving pass over a `petgraph` subgraph
//! — repeatedly relocating nodes into the neighboring community that
//! maximizes modularity gain until no move improves, without the
//! multilevel aggregation phase of full Louvain. Simpler, and converges to
//! the same flavor of partition for the modest per-tenant graph sizes this
//! system expects.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{NodeIndex, UnGraph};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use sibyl_common::ids::entity_id;
use sibyl_graph::GraphClient;
use tracing::{debug, info, instrument, warn};

use crate::errors::RetrievalError;

#[derive(Debug, Clone)]
pub struct CommunityConfig {
    pub resolutions: Vec<f64>,
    pub min_community_size: usize,
    pub max_levels: usize,
    pub store_in_graph: bool,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            resolutions: vec![0.5, 1.0, 2.0],
            min_community_size: 2,
            max_levels: 3,
            store_in_graph: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedCommunity {
    pub id: String,
    pub member_ids: Vec<String>,
    pub level: usize,
    pub resolution: f64,
    pub modularity: f64,
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
}

impl DetectedCommunity {
    pub fn member_count(&self) -> usize {
        self.member_ids.len()
    }
}

/// Undirected export of `Entity` nodes and their relationships, scoped to
/// one tenant's graph, ready for modularity-based partitioning.
async fn export_subgraph(
    graph: &GraphClient,
    organization_id: &str,
) -> Result<(UnGraph<String, ()>, HashMap<String, NodeIndex>), RetrievalError> {
    let mut g: UnGraph<String, ()> = UnGraph::new_undirected();
    let mut index_of: HashMap<String, NodeIndex> = HashMap::new();

    let node_rows = graph
        .execute_read(
            organization_id,
            &["id", "name", "type"],
            "MATCH (n:Entity) RETURN n.id AS id, n.name AS name, n.entity_type AS type",
            &[],
        )
        .await
        .map_err(|e| RetrievalError::Graph(e.to_string()))?;

    for row in &node_rows {
        if let Some(id) = row.get("id").and_then(JsonValue::as_str) {
            let idx = g.add_node(id.to_string());
            index_of.insert(id.to_string(), idx);
        }
    }

    let edge_rows = graph
        .execute_read(
            organization_id,
            &["source", "target"],
            "MATCH (a:Entity)-[r]->(b:Entity) RETURN a.id AS source, b.id AS target",
            &[],
        )
        .await
        .map_err(|e| RetrievalError::Graph(e.to_string()))?;

    let mut seen_edges: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
    for row in &edge_rows {
        let (Some(source), Some(target)) = (
            row.get("source").and_then(JsonValue::as_str),
            row.get("target").and_then(JsonValue::as_str),
        ) else {
            continue;
        };
        let (Some(&a), Some(&b)) = (index_of.get(source), index_of.get(target)) else {
            continue;
        };
        if a == b {
            continue;
        }
        let key = if a.index() < b.index() { (a, b) } else { (b, a) };
        if seen_edges.insert(key) {
            g.add_edge(a, b, ());
        }
    }

    info!(nodes = g.node_count(), edges = g.edge_count(), "exported tenant subgraph for community detection");
    Ok((g, index_of))
}

/// Node id -> community label, plus the resulting modularity score.
fn detect_communities_louvain(graph: &UnGraph<String, ()>, resolution: f64) -> (HashMap<usize, usize>, f64) {
    let n = graph.node_count();
    if n == 0 {
        return (HashMap::new(), 0.0);
    }

    let neighbors: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            graph
                .neighbors(NodeIndex::new(i))
                .map(|idx| idx.index())
                .collect()
        })
        .collect();
    let degree: Vec<f64> = neighbors.iter().map(|ns| ns.len() as f64).collect();
    let total_degree: f64 = degree.iter().sum();
    let two_m = total_degree.max(1.0);

    let mut community: Vec<usize> = (0..n).collect();
    let mut community_tot: Vec<f64> = degree.clone();

    let max_passes = 50;
    for _ in 0..max_passes {
        let mut moved = false;
        for i in 0..n {
            let current = community[i];
            let mut link_weight: HashMap<usize, f64> = HashMap::new();
            for &nb in &neighbors[i] {
                *link_weight.entry(community[nb]).or_insert(0.0) += 1.0;
            }

            community_tot[current] -= degree[i];

            let mut best_community = current;
            let mut best_gain = link_weight.get(&current).copied().unwrap_or(0.0)
                - resolution * degree[i] * community_tot[current] / two_m;

            for (&cand, &k_i_in) in &link_weight {
                if cand == current {
                    continue;
                }
                let gain = k_i_in - resolution * degree[i] * community_tot[cand] / two_m;
                if gain > best_gain {
                    best_gain = gain;
                    best_community = cand;
                }
            }

            community_tot[best_community] += degree[i];
            if best_community != current {
                community[i] = best_community;
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }

    let modularity = modularity_score(&neighbors, &degree, &community, two_m, resolution);
    (
        (0..n).map(|i| (i, community[i])).collect(),
        modularity,
    )
}

fn modularity_score(neighbors: &[Vec<usize>], degree: &[f64], community: &[usize], two_m: f64, resolution: f64) -> f64 {
    let n = community.len();
    let mut internal_edges: HashMap<usize, f64> = HashMap::new();
    let mut tot: HashMap<usize, f64> = HashMap::new();
    for i in 0..n {
        *tot.entry(community[i]).or_insert(0.0) += degree[i];
        for &nb in &neighbors[i] {
            if community[nb] == community[i] {
                *internal_edges.entry(community[i]).or_insert(0.0) += 1.0;
            }
        }
    }
    let mut q = 0.0;
    for (comm, in_edges) in &internal_edges {
        let tot_c = tot.get(comm).copied().unwrap_or(0.0);
        // in_edges double-counts each internal edge (once per endpoint).
        q += in_edges / two_m - resolution * (tot_c / two_m).powi(2);
    }
    q
}

fn partition_to_communities(
    graph: &UnGraph<String, ()>,
    partition: &HashMap<usize, usize>,
    level: usize,
    resolution: f64,
    modularity: f64,
    min_size: usize,
) -> Vec<DetectedCommunity> {
    let mut by_community: HashMap<usize, Vec<String>> = HashMap::new();
    for (&node_idx, &comm) in partition {
        if let Some(id) = graph.node_weight(NodeIndex::new(node_idx)) {
            by_community.entry(comm).or_default().push(id.clone());
        }
    }

    let mut communities = Vec::new();
    for (comm_num, mut members) in by_community {
        if members.len() < min_size {
            continue;
        }
        members.sort();
        let id = entity_id("community", &[&level.to_string(), &comm_num.to_string(), &members.join(",")]);
        communities.push(DetectedCommunity {
            id,
            member_ids: members,
            level,
            resolution,
            modularity,
            parent_id: None,
            child_ids: Vec::new(),
        });
    }
    communities
}

/// Links lower-level communities to the higher-level community they are a
/// strict subset of, mirroring the source's per-level containment check.
fn link_hierarchy(mut all_levels: Vec<Vec<DetectedCommunity>>) -> Vec<DetectedCommunity> {
    let mut flat = Vec::new();
    let level_count = all_levels.len();
    for level_idx in 0..level_count {
        let parent_sets: Vec<(String, HashSet<String>)> = if level_idx + 1 < level_count {
            all_levels[level_idx + 1]
                .iter()
                .map(|c| (c.id.clone(), c.member_ids.iter().cloned().collect()))
                .collect()
        } else {
            Vec::new()
        };

        for community in &mut all_levels[level_idx] {
            let member_set: HashSet<String> = community.member_ids.iter().cloned().collect();
            for (parent_id, parent_set) in &parent_sets {
                if member_set.is_subset(parent_set) && member_set.len() < parent_set.len() {
                    community.parent_id = Some(parent_id.clone());
                    break;
                }
            }
        }
    }

    for level_idx in 0..level_count {
        for community in &all_levels[level_idx] {
            if let Some(parent_id) = &community.parent_id {
                if level_idx + 1 < level_count {
                    if let Some(parent) = all_levels[level_idx + 1].iter_mut().find(|p| &p.id == parent_id) {
                        parent.child_ids.push(community.id.clone());
                    }
                }
            }
        }
    }

    for level in all_levels {
        flat.extend(level);
    }
    flat
}

#[instrument(skip(graph))]
pub async fn detect_communities(
    graph: &GraphClient,
    organization_id: &str,
    config: &CommunityConfig,
) -> Result<Vec<DetectedCommunity>, RetrievalError> {
    let (subgraph, _) = export_subgraph(graph, organization_id).await?;

    if subgraph.node_count() < config.min_community_size {
        debug!(nodes = subgraph.node_count(), "too few nodes for community detection");
        return Ok(Vec::new());
    }

    let mut all_levels = Vec::new();
    for (level, &resolution) in config.resolutions.iter().take(config.max_levels).enumerate() {
        let (partition, modularity) = detect_communities_louvain(&subgraph, resolution);
        let communities = partition_to_communities(&subgraph, &partition, level, resolution, modularity, config.min_community_size);
        debug!(level, resolution, count = communities.len(), modularity, "community level detected");
        all_levels.push(communities);
    }

    let linked = link_hierarchy(all_levels);
    info!(total = linked.len(), "community detection complete");
    Ok(linked)
}

#[instrument(skip(graph, communities))]
pub async fn store_communities(
    graph: &GraphClient,
    organization_id: &str,
    communities: &[DetectedCommunity],
    clear_existing: bool,
) -> Result<u32, RetrievalError> {
    if communities.is_empty() {
        return Ok(0);
    }

    if clear_existing {
        if let Err(err) = graph
            .execute_write(
                organization_id,
                &[],
                "MATCH (c:Community) DETACH DELETE c",
                &[],
            )
            .await
        {
            warn!(error = %err, "clearing existing communities failed, continuing");
        }
    }

    let mut stored = 0u32;
    for community in communities {
        let name = format!("Community L{} ({} members)", community.level, community.member_count());
        let result = graph
            .execute_write(
                organization_id,
                &["id"],
                "CREATE (c:Community {id: $id, entity_type: 'community', name: $name, \
                 member_ids: $member_ids, member_count: $member_count, level: $level, \
                 resolution: $resolution, modularity: $modularity, \
                 parent_community_id: $parent_id, child_community_ids: $child_ids, \
                 created_at: timestamp()}) RETURN c.id AS id",
                &[
                    ("id", json!(community.id)),
                    ("name", json!(name)),
                    ("member_ids", json!(community.member_ids)),
                    ("member_count", json!(community.member_count() as u64)),
                    ("level", json!(community.level as u64)),
                    ("resolution", json!(community.resolution)),
                    ("modularity", json!(community.modularity)),
                    ("parent_id", community.parent_id.clone().map(|p| json!(p)).unwrap_or(JsonValue::Null)),
                    ("child_ids", json!(community.child_ids)),
                ],
            )
            .await;

        match result {
            Ok(_) => stored += 1,
            Err(err) => warn!(community_id = %community.id, error = %err, "storing community failed, skipping"),
        }

        for member_id in &community.member_ids {
            if let Err(err) = graph
                .execute_write(
                    organization_id,
                    &[],
                    "MATCH (e:Entity {id: $entity_id}), (c:Community {id: $community_id}) \
                     MERGE (e)-[:BELONGS_TO]->(c)",
                    &[("entity_id", json!(member_id)), ("community_id", json!(community.id))],
                )
                .await
            {
                debug!(entity_id = %member_id, community_id = %community.id, error = %err, "belongs_to link failed, skipping");
            }
        }
    }

    info!(stored, "stored communities");
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_plus_pendant() -> UnGraph<String, ()> {
        let mut g: UnGraph<String, ()> = UnGraph::new_undirected();
        let a = g.add_node("a".into());
        let b = g.add_node("b".into());
        let c = g.add_node("c".into());
        let d = g.add_node("d".into());
        g.add_edge(a, b, ());
        g.add_edge(b, c, ());
        g.add_edge(a, c, ());
        g.add_edge(c, d, ());
        g
    }

    #[test]
    fn louvain_groups_a_tight_triangle_together() {
        let g = triangle_plus_pendant();
        let (partition, modularity) = detect_communities_louvain(&g, 1.0);
        assert_eq!(partition.len(), 4);
        assert!(modularity >= 0.0);
        let a_comm = partition[&0];
        let b_comm = partition[&1];
        let c_comm = partition[&2];
        assert_eq!(a_comm, b_comm);
        assert_eq!(b_comm, c_comm);
    }

    #[test]
    fn detect_communities_louvain_empty_graph_is_empty() {
        let g: UnGraph<String, ()> = UnGraph::new_undirected();
        let (partition, modularity) = detect_communities_louvain(&g, 1.0);
        assert!(partition.is_empty());
        assert_eq!(modularity, 0.0);
    }

    #[test]
    fn partition_to_communities_filters_below_min_size() {
        let g = triangle_plus_pendant();
        let mut partition = HashMap::new();
        partition.insert(0, 0);
        partition.insert(1, 0);
        partition.insert(2, 0);
        partition.insert(3, 1);
        let communities = partition_to_communities(&g, &partition, 0, 1.0, 0.2, 2);
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].member_count(), 3);
    }

    #[test]
    fn link_hierarchy_sets_parent_when_strict_subset() {
        let child = DetectedCommunity {
            id: "child".into(),
            member_ids: vec!["a".into(), "b".into()],
            level: 0,
            resolution: 0.5,
            modularity: 0.1,
            parent_id: None,
            child_ids: Vec::new(),
        };
        let parent = DetectedCommunity {
            id: "parent".into(),
            member_ids: vec!["a".into(), "b".into(), "c".into()],
            level: 1,
            resolution: 1.0,
            modularity: 0.2,
            parent_id: None,
            child_ids: Vec::new(),
        };
        let linked = link_hierarchy(vec![vec![child], vec![parent]]);
        let child = linked.iter().find(|c| c.id == "child").unwrap();
        let parent = linked.iter().find(|c| c.id == "parent").unwrap();
        assert_eq!(child.parent_id.as_deref(), Some("parent"));
        assert_eq!(parent.child_ids, vec!["child".to_string()]);
    }
}
