//! Dependency ordering over module ids.
//!
//! Dependencies that are not part of the given node set are ignored; callers
//! report those separately (forward references are legal).

use std::collections::{HashMap, VecDeque};

/// Order `nodes` so every module comes after its dependencies.
///
/// Ties keep input order. On a cycle, returns the cycle path closed on its
/// first node (`a -> b -> a`).
pub fn topo_sort<'a, I, D>(nodes: I) -> Result<Vec<String>, Vec<String>>
where
    I: IntoIterator<Item = (&'a str, D)>,
    D: IntoIterator<Item = &'a str>,
{
    let mut names: Vec<&'a str> = Vec::new();
    let mut deps: Vec<Vec<&'a str>> = Vec::new();
    for (id, d) in nodes {
        names.push(id);
        deps.push(d.into_iter().collect());
    }

    let mut idx: HashMap<&str, usize> = HashMap::with_capacity(names.len());
    for (i, &n) in names.iter().enumerate() {
        idx.entry(n).or_insert(i);
    }

    // edge dep -> module (dep before module)
    let mut adj = vec![Vec::<usize>::new(); names.len()];
    for (u, list) in deps.iter().enumerate() {
        for d in list {
            if let Some(&v) = idx.get(d) {
                if !adj[v].contains(&u) {
                    adj[v].push(u);
                }
            }
        }
    }

    if let Some(cycle) = detect_cycle_with_path(&names, &adj) {
        return Err(cycle);
    }

    // Kahn's algorithm
    let mut indeg = vec![0usize; names.len()];
    for list in &adj {
        for &target in list {
            indeg[target] += 1;
        }
    }

    let mut q: VecDeque<usize> = (0..names.len()).filter(|&i| indeg[i] == 0).collect();

    let mut order = Vec::with_capacity(names.len());
    while let Some(u) = q.pop_front() {
        order.push(names[u].to_string());
        for &w in &adj[u] {
            indeg[w] -= 1;
            if indeg[w] == 0 {
                q.push_back(w);
            }
        }
    }

    Ok(order)
}

/// DFS with path tracking. Returns the cycle path if found.
fn detect_cycle_with_path(names: &[&str], adj: &[Vec<usize>]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White, // unvisited
        Gray,  // on current path
        Black, // finished
    }

    fn dfs(
        node: usize,
        names: &[&str],
        adj: &[Vec<usize>],
        colors: &mut [Color],
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        colors[node] = Color::Gray;
        path.push(node);

        for &next in &adj[node] {
            match colors[next] {
                Color::Gray => {
                    if let Some(start) = path.iter().position(|&n| n == next) {
                        // adj edges point dep -> dependent; report in "depends on" direction
                        let mut cycle: Vec<String> =
                            path[start..].iter().rev().map(|&i| names[i].to_string()).collect();
                        cycle.push(names[path[path.len() - 1]].to_string());
                        return Some(cycle);
                    }
                }
                Color::White => {
                    if let Some(cycle) = dfs(next, names, adj, colors, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        path.pop();
        colors[node] = Color::Black;
        None
    }

    let mut colors = vec![Color::White; names.len()];
    let mut path = Vec::new();
    for i in 0..names.len() {
        if colors[i] == Color::White {
            if let Some(cycle) = dfs(i, names, adj, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sort(nodes: &[(&'static str, &[&'static str])]) -> Result<Vec<String>, Vec<String>> {
        topo_sort(nodes.iter().map(|(id, deps)| (*id, deps.iter().copied())))
    }

    #[test]
    fn dependencies_come_first() {
        let order = sort(&[
            ("dashboard", &["reports", "auth"]),
            ("reports", &["auth"]),
            ("auth", &[]),
        ])
        .unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("auth") < pos("reports"));
        assert!(pos("reports") < pos("dashboard"));
    }

    #[test]
    fn unknown_dependencies_are_ignored() {
        let order = sort(&[("a", &["ghost"]), ("b", &[])]).unwrap();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn cycle_reports_closed_path() {
        let cycle = sort(&[("a", &["b"]), ("b", &["a"])]).unwrap_err();
        assert_eq!(cycle.len(), 3);
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&"a".to_string()));
        assert!(cycle.contains(&"b".to_string()));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let cycle = sort(&[("a", &["a"])]).unwrap_err();
        assert_eq!(cycle, vec!["a", "a"]);
    }
}
