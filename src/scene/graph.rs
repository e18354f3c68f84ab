use glam::{Mat4, Quat, Vec3};

use super::document::Document;

/// Translation, rotation and scale of a node. Nodes given as a matrix are decomposed so
/// animation channels can replace single components.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trs {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Trs {
    fn default() -> Self {
        Self { translation: Vec3::ZERO, rotation: Quat::IDENTITY, scale: Vec3::ONE }
    }
}

impl Trs {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

#[derive(Clone, Debug)]
pub struct GraphNode {
    pub local: Mat4,
    pub trs: Trs,
    pub mesh: Option<usize>,
    pub skin: Option<usize>,
    pub children: Vec<usize>,
}

/// Immutable node hierarchy. Global transforms are computed on demand by [`SceneGraph::traverse`].
#[derive(Clone, Debug)]
pub struct SceneGraph {
    nodes: Vec<GraphNode>,
    roots: Vec<usize>,
}

impl SceneGraph {
    pub fn from_document(document: &Document) -> Self {
        let nodes = document
            .nodes
            .iter()
            .map(|node| {
                let (local, trs) = match node.matrix {
                    Some(matrix) => {
                        let local = Mat4::from_cols_array(&matrix);
                        let (scale, rotation, translation) = local.to_scale_rotation_translation();
                        (local, Trs { translation, rotation, scale })
                    }
                    None => {
                        let trs = Trs {
                            translation: node.translation.map(Vec3::from_array).unwrap_or(Vec3::ZERO),
                            rotation: node.rotation.map(Quat::from_array).unwrap_or(Quat::IDENTITY),
                            scale: node.scale.map(Vec3::from_array).unwrap_or(Vec3::ONE),
                        };
                        (trs.matrix(), trs)
                    }
                };
                GraphNode { local, trs, mesh: node.mesh, skin: node.skin, children: node.children.clone() }
            })
            .collect();
        Self { nodes, roots: document.root_nodes() }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Depth-first walk from the roots: each node is visited with
    /// `parent_global * local`, and its children are visited before its next sibling.
    /// `animated` may replace a node's local transform.
    pub fn traverse(
        &self,
        root_transform: Mat4,
        animated: impl Fn(usize, &GraphNode) -> Option<Mat4>,
        mut visitor: impl FnMut(usize, &Mat4),
    ) {
        let mut stack: Vec<(usize, Mat4)> = self.roots.iter().rev().map(|&id| (id, root_transform)).collect();
        while let Some((id, parent)) = stack.pop() {
            let node = &self.nodes[id];
            let local = animated(id, node).unwrap_or(node.local);
            let global = parent * local;
            visitor(id, &global);
            stack.extend(node.children.iter().rev().map(|&child| (child, global)));
        }
    }

    /// Global transform of every node for the static pose.
    pub fn global_transforms(&self, root_transform: Mat4) -> Vec<Mat4> {
        let mut globals = vec![Mat4::IDENTITY; self.nodes.len()];
        self.traverse(root_transform, |_, _| None, |id, global| globals[id] = *global);
        globals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(json: &str) -> SceneGraph {
        SceneGraph::from_document(&Document::parse(json.as_bytes()).unwrap())
    }

    const HIERARCHY: &str = r#"{
        "meshes": [],
        "scenes": [{ "nodes": [0, 3] }],
        "nodes": [
            { "translation": [1, 0, 0], "children": [1, 2] },
            { "scale": [2, 2, 2] },
            { "rotation": [0, 0.7071068, 0, 0.7071068] },
            { "matrix": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,5,0,1] }
        ]
    }"#;

    #[test]
    fn children_are_visited_before_siblings() {
        let graph = graph(HIERARCHY);
        let mut order = Vec::new();
        graph.traverse(Mat4::IDENTITY, |_, _| None, |id, _| order.push(id));
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn globals_accumulate_parent_transforms() {
        let graph = graph(HIERARCHY);
        let root = Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0));
        let globals = graph.global_transforms(root);
        assert!(globals[1].abs_diff_eq(
            root * Mat4::from_translation(Vec3::X) * Mat4::from_scale(Vec3::splat(2.0)),
            1e-6
        ));
        assert!(globals[3].transform_point3(Vec3::ZERO).abs_diff_eq(Vec3::new(0.0, 5.0, -2.0), 1e-6));
    }

    #[test]
    fn traversal_is_idempotent() {
        let graph = graph(HIERARCHY);
        assert_eq!(graph.global_transforms(Mat4::IDENTITY), graph.global_transforms(Mat4::IDENTITY));
    }

    #[test]
    fn animated_locals_replace_static_ones() {
        let graph = graph(HIERARCHY);
        let mut child = Mat4::ZERO;
        graph.traverse(
            Mat4::IDENTITY,
            |id, _| (id == 0).then(|| Mat4::from_translation(Vec3::Y)),
            |id, global| {
                if id == 1 {
                    child = *global;
                }
            },
        );
        assert!(child.abs_diff_eq(Mat4::from_translation(Vec3::Y) * Mat4::from_scale(Vec3::splat(2.0)), 1e-6));
    }

    #[test]
    fn matrix_nodes_are_decomposed() {
        let graph = graph(HIERARCHY);
        assert!(graph.node(3).trs.translation.abs_diff_eq(Vec3::new(0.0, 5.0, 0.0), 1e-6));
        assert_eq!(graph.node(0).trs.scale, Vec3::ONE);
    }
}
