//! Coarse input skeletons in bracket notation.
//!
//! A skeleton file is a sequence of tokens:
//!
//! - `(x z y)`: a point, written in `(x, z, y)` order and stored as
//!   `(x, y, z)`. The first point is the root; every later point becomes a
//!   child of the current tip and then the tip itself.
//! - `[`: remembers the current tip as the start of a branch.
//! - `]`: ends the branch and returns to the remembered tip.
//!
//! Nodes are stored in an arena ([`Tree::nodes`]) and linked by index.

use std::path::Path;

use glam::Vec3;

use crate::{
    error::{FormatError, SkeletonError},
    mesh::LineMesh,
    types::NodeId,
};

#[derive(Debug, Clone)]
pub struct SkeletonNode {
    pub pos: Vec3,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Number of edges between this node and the root.
    pub depth: usize,
}

impl SkeletonNode {
    pub fn new_root(pos: Vec3) -> Self {
        Self {
            pos,
            parent: None,
            children: Vec::with_capacity(2),
            depth: 0,
        }
    }

    pub fn new_child(pos: Vec3, parent: NodeId, depth: usize) -> Self {
        Self {
            pos,
            parent: Some(parent),
            children: Vec::with_capacity(2),
            depth,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Aggregate statistics gathered while a tree is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkeletonStats {
    pub min: Vec3,
    pub max: Vec3,
    pub node_count: usize,
    pub edge_count: usize,
    /// Sum of parent-child distances.
    pub total_length: f32,
    position_sum: Vec3,
}

impl SkeletonStats {
    fn from_point(pos: Vec3) -> Self {
        Self {
            min: pos,
            max: pos,
            node_count: 1,
            edge_count: 0,
            total_length: 0.0,
            position_sum: pos,
        }
    }

    fn add_edge(&mut self, from: Vec3, to: Vec3) {
        self.min = self.min.min(to);
        self.max = self.max.max(to);
        self.node_count += 1;
        self.edge_count += 1;
        self.total_length += from.distance(to);
        self.position_sum += to;
    }

    /// Arithmetic mean of all node positions.
    pub fn center_of_mass(&self) -> Vec3 {
        if self.node_count == 0 {
            Vec3::ZERO
        } else {
            self.position_sum / self.node_count as f32
        }
    }

    pub fn average_segment_length(&self) -> f32 {
        if self.edge_count == 0 {
            0.0
        } else {
            self.total_length / self.edge_count as f32
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Combines the statistics of two independent trees.
    pub fn merged(&self, other: &SkeletonStats) -> SkeletonStats {
        SkeletonStats {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            node_count: self.node_count + other.node_count,
            edge_count: self.edge_count + other.edge_count,
            total_length: self.total_length + other.total_length,
            position_sum: self.position_sum + other.position_sum,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    pub nodes: Vec<SkeletonNode>,
    stats: SkeletonStats,
}

impl Tree {
    pub fn new(root_pos: Vec3) -> Self {
        Self {
            nodes: vec![SkeletonNode::new_root(root_pos)],
            stats: SkeletonStats::from_point(root_pos),
        }
    }

    pub fn add_child(&mut self, parent: NodeId, pos: Vec3) -> NodeId {
        let id = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        self.stats.add_edge(self.nodes[parent].pos, pos);
        self.nodes.push(SkeletonNode::new_child(pos, parent, depth));
        self.nodes[parent].children.push(id);
        id
    }

    /// Parses bracket notation into a tree.
    ///
    /// Statistics are accumulated while nodes are added, so no second pass
    /// over the tree is needed.
    ///
    /// ### Errors
    /// Any [`FormatError`]: empty input, a first token other than `(`,
    /// malformed points, and unbalanced brackets.
    pub fn parse(src: &str) -> Result<Tree, FormatError> {
        let tokens = lex(src);
        let Some(first) = tokens.first() else {
            return Err(FormatError::Empty);
        };
        if first.kind != TokenKind::Open {
            return Err(FormatError::MissingRootOpen {
                offset: first.offset,
            });
        }

        let mut tree: Option<Tree> = None;
        let mut tip: NodeId = 0;
        let mut branches: Vec<NodeId> = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];
            match token.kind {
                TokenKind::Open => {
                    let (pos, next) = parse_point(&tokens, i)?;
                    i = next;
                    if let Some(t) = tree.as_mut() {
                        tip = t.add_child(tip, pos);
                    } else {
                        tree = Some(Tree::new(pos));
                    }
                    continue;
                }
                TokenKind::Push => branches.push(tip),
                TokenKind::Pop => {
                    tip = branches.pop().ok_or(FormatError::UnbalancedClose {
                        offset: token.offset,
                    })?;
                }
                TokenKind::Close | TokenKind::Number => {
                    return Err(FormatError::Unexpected {
                        offset: token.offset,
                        token: token.text.to_string(),
                    });
                }
            }
            i += 1;
        }

        if !branches.is_empty() {
            return Err(FormatError::UnclosedBranch {
                open: branches.len(),
            });
        }

        // The first token is `(`, so a successful parse always has a root.
        tree.ok_or(FormatError::Empty)
    }

    pub fn stats(&self) -> &SkeletonStats {
        &self.stats
    }

    /// Childless nodes in creation order. Each terminates one path.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, n)| n.is_leaf().then_some(id))
            .collect()
    }

    /// Positions from `leaf` back to the root, following parent links.
    pub fn path(&self, leaf: NodeId) -> Vec<Vec3> {
        let mut out = Vec::with_capacity(self.nodes[leaf].depth + 1);
        let mut cur = Some(leaf);
        while let Some(id) = cur {
            let node = &self.nodes[id];
            out.push(node.pos);
            cur = node.parent;
        }
        out
    }

    /// One path per leaf.
    pub fn paths(&self) -> Vec<Vec<Vec3>> {
        self.leaves().into_iter().map(|l| self.path(l)).collect()
    }

    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Flattens the tree into a line list, darkening `color` with depth.
    ///
    /// Uses an explicit depth-first worklist, so deep skeletons do not grow
    /// the call stack.
    pub fn line_mesh(&self, color: Vec3) -> LineMesh {
        struct Frame {
            node: NodeId,
            vertex: u32,
            explored: usize,
        }

        let mut mesh = LineMesh::new();
        if self.nodes.is_empty() {
            return mesh;
        }

        let max_depth = self.max_depth().max(1) as f32;
        let shade = |depth: usize| color * (1.0 - 0.5 * depth as f32 / max_depth);

        let root_vertex = mesh.push_vertex(self.nodes[0].pos, shade(0));
        let mut stack = vec![Frame {
            node: 0,
            vertex: root_vertex,
            explored: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let node = &self.nodes[frame.node];
            if frame.explored == node.children.len() {
                stack.pop();
                continue;
            }
            let child = node.children[frame.explored];
            frame.explored += 1;
            let parent_vertex = frame.vertex;

            let child_node = &self.nodes[child];
            let v = mesh.push_vertex(child_node.pos, shade(child_node.depth));
            mesh.push_segment(parent_vertex, v);
            stack.push(Frame {
                node: child,
                vertex: v,
                explored: 0,
            });
        }
        mesh
    }
}

/// Shoot and root trees of one plant.
#[derive(Debug, Clone)]
pub struct Skeleton {
    pub shoot: Tree,
    pub root: Tree,
}

pub const SHOOT_COLOR: Vec3 = Vec3::new(0.35, 0.8, 0.3);
pub const ROOT_COLOR: Vec3 = Vec3::new(0.6, 0.42, 0.25);

impl Skeleton {
    pub fn parse(shoot_src: &str, root_src: &str) -> Result<Skeleton, FormatError> {
        Ok(Skeleton {
            shoot: Tree::parse(shoot_src)?,
            root: Tree::parse(root_src)?,
        })
    }

    pub fn from_path(
        shoot: impl AsRef<Path>,
        root: impl AsRef<Path>,
    ) -> Result<Skeleton, SkeletonError> {
        Ok(Skeleton {
            shoot: read_tree(shoot.as_ref())?,
            root: read_tree(root.as_ref())?,
        })
    }

    /// Shoot paths followed by root paths, each from leaf to anchor.
    pub fn paths(&self) -> Vec<Vec<Vec3>> {
        let mut paths = self.shoot.paths();
        paths.extend(self.root.paths());
        paths
    }

    /// Statistics over both trees.
    pub fn stats(&self) -> SkeletonStats {
        self.shoot.stats().merged(self.root.stats())
    }

    pub fn line_mesh(&self) -> LineMesh {
        let mut mesh = self.shoot.line_mesh(SHOOT_COLOR);
        mesh.append(&self.root.line_mesh(ROOT_COLOR));
        mesh
    }
}

fn read_tree(path: &Path) -> Result<Tree, SkeletonError> {
    let text = std::fs::read_to_string(path).map_err(|source| SkeletonError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Tree::parse(&text).map_err(|source| SkeletonError::Format {
        path: path.display().to_string(),
        source,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Open,
    Close,
    Push,
    Pop,
    Number,
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
    offset: usize,
}

/// Splits on whitespace and around the four delimiter characters.
fn lex(src: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in src.char_indices() {
        let kind = match c {
            '(' => Some(TokenKind::Open),
            ')' => Some(TokenKind::Close),
            '[' => Some(TokenKind::Push),
            ']' => Some(TokenKind::Pop),
            _ => None,
        };
        if let Some(kind) = kind {
            flush_number(&mut tokens, src, &mut start, i);
            tokens.push(Token {
                kind,
                text: &src[i..i + 1],
                offset: i,
            });
        } else if c.is_whitespace() {
            flush_number(&mut tokens, src, &mut start, i);
        } else if start.is_none() {
            start = Some(i);
        }
    }
    flush_number(&mut tokens, src, &mut start, src.len());
    tokens
}

fn flush_number<'a>(
    tokens: &mut Vec<Token<'a>>,
    src: &'a str,
    start: &mut Option<usize>,
    end: usize,
) {
    if let Some(s) = start.take() {
        tokens.push(Token {
            kind: TokenKind::Number,
            text: &src[s..end],
            offset: s,
        });
    }
}

/// Parses `( x z y )` starting at `tokens[open]`.
///
/// ### Returns
/// The point in `(x, y, z)` order and the index of the token after `)`.
fn parse_point(tokens: &[Token<'_>], open: usize) -> Result<(Vec3, usize), FormatError> {
    let offset = tokens[open].offset;
    let mut coords = Vec::with_capacity(3);
    let mut i = open + 1;

    loop {
        let Some(token) = tokens.get(i) else {
            return Err(FormatError::UnclosedPoint { offset });
        };
        match token.kind {
            TokenKind::Number => {
                let v: f32 = token.text.parse().map_err(|_| FormatError::InvalidNumber {
                    offset: token.offset,
                    text: token.text.to_string(),
                })?;
                coords.push(v);
            }
            TokenKind::Close => break,
            _ => return Err(FormatError::UnclosedPoint { offset }),
        }
        i += 1;
    }

    if coords.len() != 3 {
        return Err(FormatError::WrongArity {
            offset,
            found: coords.len(),
        });
    }
    // Source order is (x, z, y).
    Ok((Vec3::new(coords[0], coords[2], coords[1]), i + 1))
}
