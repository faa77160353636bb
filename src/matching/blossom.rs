//! Edmonds' blossom algorithm for maximum-weight matching on general graphs
//!
//! Primal-dual method in O(n^3), with odd cycles contracted into blossoms.
//! Weights are integers, so every dual variable stays integral and the slack
//! of an edge between two S-blossoms is always even.
//!
//! Vertices are `0..n`; blossoms reuse ids `n..2n`. Edge `k` owns endpoints
//! `2k` and `2k + 1`, and `endpoint[p ^ 1]` is the far end of endpoint `p`.

/// Edge weights and dual variables
pub(super) type Weight = i128;

const NIL: usize = usize::MAX;

const FREE: u8 = 0;
const S: u8 = 1;
const T: u8 = 2;
const BREADCRUMB: u8 = 4;

/// Dual adjustment chosen at the end of a scan
enum Step {
    /// Vertex duals reached zero; no augmenting path exists
    Stop,
    /// Make edge `k` between an S-vertex and a free vertex tight
    Grow(usize),
    /// Make edge `k` between two S-blossoms tight
    Contract(usize),
    /// Expand the T-blossom whose dual reached zero
    Expand(usize),
}

/// Maximum-weight matching over `n` vertices.
///
/// Returns the mate of each vertex. Edges must be free of self-loops and
/// duplicates; weights must be small enough that `4 * max_weight` fits in `Weight`.
pub(super) fn max_weight_matching(n: usize, edges: &[(usize, usize, Weight)]) -> Vec<Option<usize>> {
    if edges.is_empty() {
        return vec![None; n];
    }
    let mut solver = Solver::new(n, edges);
    solver.run();
    solver.mates()
}

struct Solver<'a> {
    n: usize,
    edges: &'a [(usize, usize, Weight)],
    endpoint: Vec<usize>,
    /// Endpoints `p` such that `endpoint[p ^ 1]` is the vertex itself
    neighbend: Vec<Vec<usize>>,
    /// Remote endpoint of the matched edge, or NIL
    mate: Vec<usize>,
    label: Vec<u8>,
    /// Endpoint through which a vertex or top-level blossom got its label
    label_end: Vec<usize>,
    in_blossom: Vec<usize>,
    blossom_parent: Vec<usize>,
    /// Sub-blossoms in cyclic order, starting at the base
    blossom_children: Vec<Vec<usize>>,
    blossom_base: Vec<usize>,
    /// `blossom_endpoints[b][i]` joins child `i` to child `i + 1`
    blossom_endpoints: Vec<Vec<usize>>,
    /// Least-slack edge to a different S-blossom (or, for a free vertex, to any S-blossom)
    best_edge: Vec<usize>,
    /// Least-slack edge to each neighboring S-blossom, per top-level S-blossom
    blossom_best_edges: Vec<Option<Vec<usize>>>,
    unused_blossoms: Vec<usize>,
    dual: Vec<Weight>,
    allow_edge: Vec<bool>,
    queue: Vec<usize>,
}

/// Index into a cyclic child list, counting negative positions from the end
fn wrap(j: isize, len: usize) -> usize {
    j.rem_euclid(len as isize) as usize
}

impl<'a> Solver<'a> {
    fn new(n: usize, edges: &'a [(usize, usize, Weight)]) -> Self {
        let max_weight = edges.iter().map(|&(_, _, w)| w).max().unwrap_or(0).max(0);

        let mut endpoint = Vec::with_capacity(2 * edges.len());
        let mut neighbend = vec![Vec::new(); n];
        for (k, &(i, j, _)) in edges.iter().enumerate() {
            endpoint.push(i);
            endpoint.push(j);
            neighbend[i].push(2 * k + 1);
            neighbend[j].push(2 * k);
        }

        let mut dual = vec![max_weight; n];
        dual.resize(2 * n, 0);

        Self {
            n,
            edges,
            endpoint,
            neighbend,
            mate: vec![NIL; n],
            label: vec![FREE; 2 * n],
            label_end: vec![NIL; 2 * n],
            in_blossom: (0..n).collect(),
            blossom_parent: vec![NIL; 2 * n],
            blossom_children: vec![Vec::new(); 2 * n],
            blossom_base: (0..n).chain(std::iter::repeat(NIL).take(n)).collect(),
            blossom_endpoints: vec![Vec::new(); 2 * n],
            best_edge: vec![NIL; 2 * n],
            blossom_best_edges: vec![None; 2 * n],
            unused_blossoms: (n..2 * n).collect(),
            dual,
            allow_edge: vec![false; edges.len()],
            queue: Vec::new(),
        }
    }

    fn slack(&self, k: usize) -> Weight {
        let (i, j, w) = self.edges[k];
        self.dual[i] + self.dual[j] - 2 * w
    }

    fn leaves(&self, b: usize) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_leaves(b, &mut out);
        out
    }

    fn collect_leaves(&self, b: usize, out: &mut Vec<usize>) {
        if b < self.n {
            out.push(b);
        } else {
            for &child in &self.blossom_children[b] {
                self.collect_leaves(child, out);
            }
        }
    }

    /// Label the top-level blossom containing `w` through endpoint `p`
    fn assign_label(&mut self, w: usize, t: u8, p: usize) {
        let b = self.in_blossom[w];
        debug_assert!(self.label[w] == FREE && self.label[b] == FREE);
        self.label[w] = t;
        self.label[b] = t;
        self.label_end[w] = p;
        self.label_end[b] = p;
        self.best_edge[w] = NIL;
        self.best_edge[b] = NIL;
        if t == S {
            let leaves = self.leaves(b);
            self.queue.extend(leaves);
        } else if t == T {
            // The mate of a T-blossom's base becomes S
            let matched = self.mate[self.blossom_base[b]];
            debug_assert_ne!(matched, NIL);
            let next = self.endpoint[matched];
            self.assign_label(next, S, matched ^ 1);
        }
    }

    /// Trace back from `v` and `w` to find a new blossom's base, or NIL for an augmenting path
    fn scan_blossom(&mut self, mut v: usize, mut w: usize) -> usize {
        let mut path = Vec::new();
        let mut base = NIL;
        while v != NIL {
            let b = self.in_blossom[v];
            if self.label[b] & BREADCRUMB != 0 {
                base = self.blossom_base[b];
                break;
            }
            debug_assert_eq!(self.label[b], S);
            path.push(b);
            self.label[b] = S | BREADCRUMB;
            if self.label_end[b] == NIL {
                // Base of b is a single free vertex
                v = NIL;
            } else {
                let t = self.in_blossom[self.endpoint[self.label_end[b]]];
                debug_assert_eq!(self.label[t], T);
                v = self.endpoint[self.label_end[t]];
            }
            if w != NIL {
                std::mem::swap(&mut v, &mut w);
            }
        }
        for b in path {
            self.label[b] = S;
        }
        base
    }

    /// Contract the odd cycle closed by edge `k` into a new S-blossom rooted at `base`
    fn add_blossom(&mut self, base: usize, k: usize) {
        let (v, w, _) = self.edges[k];
        let bb = self.in_blossom[base];
        let mut bv = self.in_blossom[v];
        let mut bw = self.in_blossom[w];
        // A laminar family of odd sets over n vertices has fewer than n members
        let b = self
            .unused_blossoms
            .pop()
            .expect("blossom pool holds n ids, more than can ever be nested");

        self.blossom_base[b] = base;
        self.blossom_parent[b] = NIL;
        self.blossom_parent[bb] = b;

        let mut children = Vec::new();
        let mut endps = Vec::new();
        while bv != bb {
            self.blossom_parent[bv] = b;
            children.push(bv);
            endps.push(self.label_end[bv]);
            bv = self.in_blossom[self.endpoint[self.label_end[bv]]];
        }
        children.push(bb);
        children.reverse();
        endps.reverse();
        endps.push(2 * k);
        while bw != bb {
            self.blossom_parent[bw] = b;
            children.push(bw);
            endps.push(self.label_end[bw] ^ 1);
            bw = self.in_blossom[self.endpoint[self.label_end[bw]]];
        }

        debug_assert_eq!(self.label[bb], S);
        self.label[b] = S;
        self.label_end[b] = self.label_end[bb];
        self.dual[b] = 0;
        self.blossom_children[b] = children.clone();
        self.blossom_endpoints[b] = endps;

        for leaf in self.leaves(b) {
            if self.label[self.in_blossom[leaf]] == T {
                // Former T-vertices are now S and must be scanned
                self.queue.push(leaf);
            }
            self.in_blossom[leaf] = b;
        }

        let mut best_to = vec![NIL; 2 * self.n];
        for &child in &children {
            let lists: Vec<Vec<usize>> = match self.blossom_best_edges[child].take() {
                Some(list) => vec![list],
                None => self
                    .leaves(child)
                    .into_iter()
                    .map(|leaf| self.neighbend[leaf].iter().map(|p| p / 2).collect())
                    .collect(),
            };
            for k in lists.into_iter().flatten() {
                let (i, j, _) = self.edges[k];
                let j = if self.in_blossom[j] == b { i } else { j };
                let bj = self.in_blossom[j];
                if bj != b
                    && self.label[bj] == S
                    && (best_to[bj] == NIL || self.slack(k) < self.slack(best_to[bj]))
                {
                    best_to[bj] = k;
                }
            }
            self.best_edge[child] = NIL;
        }

        let best: Vec<usize> = best_to.into_iter().filter(|&k| k != NIL).collect();
        let mut least = NIL;
        for &k in &best {
            if least == NIL || self.slack(k) < self.slack(least) {
                least = k;
            }
        }
        self.blossom_best_edges[b] = Some(best);
        self.best_edge[b] = least;
    }

    /// Undo the contraction of blossom `b`
    fn expand_blossom(&mut self, b: usize, end_stage: bool) {
        let children = self.blossom_children[b].clone();
        for &s in &children {
            self.blossom_parent[s] = NIL;
            if s < self.n {
                self.in_blossom[s] = s;
            } else if end_stage && self.dual[s] == 0 {
                self.expand_blossom(s, end_stage);
            } else {
                for leaf in self.leaves(s) {
                    self.in_blossom[leaf] = s;
                }
            }
        }

        // A T-blossom expanded mid-stage must relabel the even path from its
        // entry child around to the base
        if !end_stage && self.label[b] == T {
            let endps = self.blossom_endpoints[b].clone();
            let len = children.len();
            let entry_child = self.in_blossom[self.endpoint[self.label_end[b] ^ 1]];
            debug_assert_eq!(self.blossom_parent[entry_child], NIL);
            let pos = children
                .iter()
                .position(|&c| c == entry_child)
                .expect("a labelled T-blossom is entered through one of its children");
            let (mut j, step, trick): (isize, isize, usize) = if pos & 1 == 1 {
                (pos as isize - len as isize, 1, 0)
            } else {
                (pos as isize, -1, 1)
            };

            let mut p = self.label_end[b];
            while j != 0 {
                let near = self.endpoint[p ^ 1];
                self.label[near] = FREE;
                let e = endps[wrap(j - trick as isize, len)];
                let far = self.endpoint[e ^ trick ^ 1];
                self.label[far] = FREE;
                self.assign_label(near, T, p);
                self.allow_edge[e / 2] = true;
                j += step;
                p = endps[wrap(j - trick as isize, len)] ^ trick;
                self.allow_edge[p / 2] = true;
                j += step;
            }

            let bv = children[wrap(j, len)];
            let near = self.endpoint[p ^ 1];
            self.label[near] = T;
            self.label[bv] = T;
            self.label_end[near] = p;
            self.label_end[bv] = p;
            self.best_edge[bv] = NIL;
            j += step;

            while children[wrap(j, len)] != entry_child {
                let bv = children[wrap(j, len)];
                if self.label[bv] == S {
                    j += step;
                    continue;
                }
                let reached = self
                    .leaves(bv)
                    .into_iter()
                    .find(|&v| self.label[v] != FREE);
                if let Some(v) = reached {
                    debug_assert_eq!(self.label[v], T);
                    self.label[v] = FREE;
                    let mate_end = self.mate[self.blossom_base[bv]];
                    let partner = self.endpoint[mate_end];
                    self.label[partner] = FREE;
                    let via = self.label_end[v];
                    self.assign_label(v, T, via);
                }
                j += step;
            }
        }

        self.label[b] = FREE;
        self.label_end[b] = NIL;
        self.blossom_children[b].clear();
        self.blossom_endpoints[b].clear();
        self.blossom_base[b] = NIL;
        self.blossom_best_edges[b] = None;
        self.best_edge[b] = NIL;
        self.unused_blossoms.push(b);
    }

    /// Flip matched and unmatched edges along the path inside `b` from `v` to its base
    fn augment_blossom(&mut self, b: usize, v: usize) {
        let mut t = v;
        while self.blossom_parent[t] != b {
            t = self.blossom_parent[t];
        }
        if t >= self.n {
            self.augment_blossom(t, v);
        }

        let len = self.blossom_children[b].len();
        debug_assert_eq!(self.blossom_parent[t], b);
        let i = self.blossom_children[b]
            .iter()
            .position(|&c| c == t)
            .expect("the top sub-blossom below b is one of its children");
        let (mut j, step, trick): (isize, isize, usize) = if i & 1 == 1 {
            (i as isize - len as isize, 1, 0)
        } else {
            (i as isize, -1, 1)
        };

        while j != 0 {
            j += step;
            let child = self.blossom_children[b][wrap(j, len)];
            let p = self.blossom_endpoints[b][wrap(j - trick as isize, len)] ^ trick;
            if child >= self.n {
                let entry = self.endpoint[p];
                self.augment_blossom(child, entry);
            }
            j += step;
            let child = self.blossom_children[b][wrap(j, len)];
            if child >= self.n {
                let entry = self.endpoint[p ^ 1];
                self.augment_blossom(child, entry);
            }
            self.mate[self.endpoint[p]] = p ^ 1;
            self.mate[self.endpoint[p ^ 1]] = p;
        }

        self.blossom_children[b].rotate_left(i);
        self.blossom_endpoints[b].rotate_left(i);
        self.blossom_base[b] = self.blossom_base[self.blossom_children[b][0]];
        debug_assert_eq!(self.blossom_base[b], v);
    }

    /// Augment along the path through tight edge `k` joining two S-trees
    fn augment_matching(&mut self, k: usize) {
        let (v, w, _) = self.edges[k];
        for (mut s, mut p) in [(v, 2 * k + 1), (w, 2 * k)] {
            loop {
                let bs = self.in_blossom[s];
                debug_assert_eq!(self.label[bs], S);
                if bs >= self.n {
                    self.augment_blossom(bs, s);
                }
                self.mate[s] = p;
                if self.label_end[bs] == NIL {
                    // Reached a free root
                    break;
                }
                let t = self.endpoint[self.label_end[bs]];
                let bt = self.in_blossom[t];
                debug_assert_eq!(self.label[bt], T);
                s = self.endpoint[self.label_end[bt]];
                let j = self.endpoint[self.label_end[bt] ^ 1];
                if bt >= self.n {
                    self.augment_blossom(bt, j);
                }
                self.mate[j] = self.label_end[bt];
                p = self.label_end[bt] ^ 1;
            }
        }
    }

    /// One stage per augmentation; at most n stages
    fn run(&mut self) {
        let n = self.n;
        for _ in 0..n {
            self.label.fill(FREE);
            self.best_edge.fill(NIL);
            for slot in &mut self.blossom_best_edges[n..] {
                *slot = None;
            }
            self.allow_edge.fill(false);
            self.queue.clear();

            for v in 0..n {
                if self.mate[v] == NIL && self.label[self.in_blossom[v]] == FREE {
                    self.assign_label(v, S, NIL);
                }
            }

            let mut augmented = false;
            loop {
                while !augmented {
                    let Some(v) = self.queue.pop() else {
                        break;
                    };
                    debug_assert_eq!(self.label[self.in_blossom[v]], S);
                    augmented = self.scan_vertex(v);
                }
                if augmented {
                    break;
                }

                let step = self.choose_step();
                match step {
                    Step::Stop => break,
                    Step::Grow(k) => {
                        self.allow_edge[k] = true;
                        let (i, j, _) = self.edges[k];
                        let s = if self.label[self.in_blossom[i]] == FREE { j } else { i };
                        self.queue.push(s);
                    }
                    Step::Contract(k) => {
                        self.allow_edge[k] = true;
                        let (i, _, _) = self.edges[k];
                        self.queue.push(i);
                    }
                    Step::Expand(b) => self.expand_blossom(b, false),
                }
            }

            if !augmented {
                break;
            }

            // S-blossoms with zero dual cannot survive into the next stage
            for b in n..2 * n {
                if self.blossom_parent[b] == NIL
                    && self.blossom_base[b] != NIL
                    && self.label[b] == S
                    && self.dual[b] == 0
                {
                    self.expand_blossom(b, true);
                }
            }
        }
    }

    /// Scan the edges of S-vertex `v`; true once the matching was augmented
    fn scan_vertex(&mut self, v: usize) -> bool {
        for idx in 0..self.neighbend[v].len() {
            let p = self.neighbend[v][idx];
            let k = p / 2;
            let w = self.endpoint[p];
            if self.in_blossom[v] == self.in_blossom[w] {
                continue;
            }

            let kslack = if self.allow_edge[k] { 0 } else { self.slack(k) };
            if kslack <= 0 {
                self.allow_edge[k] = true;
            }

            let bw = self.in_blossom[w];
            if self.allow_edge[k] {
                if self.label[bw] == FREE {
                    self.assign_label(w, T, p ^ 1);
                } else if self.label[bw] == S {
                    let base = self.scan_blossom(v, w);
                    if base != NIL {
                        self.add_blossom(base, k);
                    } else {
                        self.augment_matching(k);
                        return true;
                    }
                } else if self.label[w] == FREE {
                    // w sits inside a T-blossom but is not yet reached
                    self.label[w] = T;
                    self.label_end[w] = p ^ 1;
                }
            } else if self.label[bw] == S {
                let b = self.in_blossom[v];
                if self.best_edge[b] == NIL || kslack < self.slack(self.best_edge[b]) {
                    self.best_edge[b] = k;
                }
            } else if self.label[w] == FREE
                && (self.best_edge[w] == NIL || kslack < self.slack(self.best_edge[w]))
            {
                self.best_edge[w] = k;
            }
        }
        false
    }

    /// Pick the smallest dual change and apply it
    fn choose_step(&mut self) -> Step {
        let n = self.n;
        let mut step = Step::Stop;
        let mut delta = self.dual[..n].iter().copied().min().unwrap_or(0);

        for v in 0..n {
            if self.label[self.in_blossom[v]] == FREE && self.best_edge[v] != NIL {
                let d = self.slack(self.best_edge[v]);
                if d < delta {
                    delta = d;
                    step = Step::Grow(self.best_edge[v]);
                }
            }
        }

        for b in 0..2 * n {
            if self.blossom_parent[b] == NIL && self.label[b] == S && self.best_edge[b] != NIL {
                let kslack = self.slack(self.best_edge[b]);
                debug_assert_eq!(kslack % 2, 0);
                let d = kslack / 2;
                if d < delta {
                    delta = d;
                    step = Step::Contract(self.best_edge[b]);
                }
            }
        }

        for b in n..2 * n {
            if self.blossom_base[b] != NIL
                && self.blossom_parent[b] == NIL
                && self.label[b] == T
                && self.dual[b] < delta
            {
                delta = self.dual[b];
                step = Step::Expand(b);
            }
        }

        for v in 0..n {
            match self.label[self.in_blossom[v]] {
                S => self.dual[v] -= delta,
                T => self.dual[v] += delta,
                _ => {}
            }
        }
        for b in n..2 * n {
            if self.blossom_base[b] != NIL && self.blossom_parent[b] == NIL {
                match self.label[b] {
                    S => self.dual[b] += delta,
                    T => self.dual[b] -= delta,
                    _ => {}
                }
            }
        }

        step
    }

    fn mates(&self) -> Vec<Option<usize>> {
        self.mate
            .iter()
            .map(|&p| (p != NIL).then(|| self.endpoint[p]))
            .collect()
    }
}
