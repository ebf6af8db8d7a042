use nodemesh::{
    ArithOp, DataDescriptor, DataUpdate, ExpressionNode, Geometry, MaterialKind, Mat4, Node,
    NodeMesh, Operation, Operator, PrimitiveKind, Vec3, fold_operators,
};

/// Evaluates a chain as plain arithmetic.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Value(f64);

impl ExpressionNode for Value {
    fn combine(&self, op: ArithOp, rhs: &Self) -> Self {
        Value(match op {
            ArithOp::Add => self.0 + rhs.0,
            ArithOp::Sub => self.0 - rhs.0,
            ArithOp::Mul => self.0 * rhs.0,
            ArithOp::Div => self.0 / rhs.0,
        })
    }
}

fn triangle() -> Geometry {
    Geometry::new()
        .with_attribute(
            "position",
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            3,
        )
        .unwrap()
        .with_index(vec![0, 1, 2])
        .unwrap()
}

#[test]
fn chain_folds_left_to_right() {
    let chain = [
        Operator::new(Operation::Add, Value(2.0)),
        Operator::new(Operation::Mul, Value(3.0)),
    ];
    assert_eq!(fold_operators(Value(1.0), &chain), Value(9.0));

    let chain = [
        Operator::new(Operation::Sub, Value(4.0)),
        Operator::new(Operation::Div, Value(2.0)),
        Operator::new(Operation::Assign, Value(-1.0)),
        Operator::new(Operation::Add, Value(0.5)),
    ];
    assert_eq!(fold_operators(Value(10.0), &chain), Value(-0.5));
}

#[test]
fn single_triangle_sort_keeps_order() {
    let mut mesh =
        NodeMesh::new(PrimitiveKind::Mesh, MaterialKind::Basic, triangle(), Vec::new()).unwrap();
    mesh.sort_triangle_indices(Vec3::new(0.0, 0.0, 10.0)).unwrap();
    assert_eq!(mesh.geometry().borrow().index().unwrap().array(), &[0, 1, 2]);
}

#[test]
fn sort_is_stable_under_repetition() {
    let mut mesh = NodeMesh::new(
        PrimitiveKind::Mesh,
        MaterialKind::Basic,
        Geometry::sphere(12, 6),
        Vec::new(),
    )
    .unwrap();
    mesh.set_matrix(Mat4::from_translation(Vec3::new(1.0, 0.0, -3.0)));

    let camera = Vec3::new(2.0, 1.5, 4.0);
    mesh.sort_triangle_indices(camera).unwrap();
    let first = mesh.geometry().borrow().index().unwrap().array().to_vec();
    mesh.sort_triangle_indices(camera).unwrap();
    assert_eq!(mesh.geometry().borrow().index().unwrap().array(), &first[..]);

    // Farthest centroid first.
    let geometry = mesh.geometry().borrow();
    let positions = geometry.positions().unwrap();
    let local = mesh.matrix().inverse().transform_point3(camera);
    let distance = |tri: &[u32]| {
        let c = tri
            .iter()
            .map(|&i| positions.vec3(i as usize))
            .fold(Vec3::ZERO, |a, b| a + b)
            / 3.0;
        local.distance_squared(c)
    };
    let distances: Vec<f32> = first.chunks_exact(3).map(distance).collect();
    assert!(distances.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn update_data_round_trip_and_identity() {
    let mut mesh = NodeMesh::new(
        PrimitiveKind::Mesh,
        MaterialKind::Basic,
        triangle(),
        vec![DataDescriptor::new("motion")
            .component("velocity", 3)
            .component("age", 1)],
    )
    .unwrap();

    let (velocity_id, age_id) = {
        let g = mesh.geometry().borrow();
        (
            g.attribute("velocity").unwrap().id(),
            g.attribute("age").unwrap().id(),
        )
    };

    let velocity = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
    let mut update = DataUpdate::new();
    update.insert("velocity".to_string(), velocity.clone());
    update.insert("age".to_string(), vec![0.0, 1.0, 2.0, 3.0]);
    mesh.update_data(&update).unwrap();

    let g = mesh.geometry().borrow();
    assert_eq!(g.attribute("velocity").unwrap().array(), &velocity[..]);
    assert_eq!(g.attribute("velocity").unwrap().id(), velocity_id);
    assert_eq!(g.attribute("age").unwrap().array(), &[0.0, 1.0, 2.0, 3.0]);
    assert_ne!(g.attribute("age").unwrap().id(), age_id);
}

#[test]
fn copies_are_independent() {
    let mut original =
        NodeMesh::new(PrimitiveKind::Mesh, MaterialKind::Lit, triangle(), Vec::new()).unwrap();
    let scale = Node::float(2.0);
    original.add_transform_node(Operation::Mul, scale.clone());
    original.add_mask_node(Node::position_local().x().lt(&Node::float(0.9)));

    let mut copy = original.copy();
    assert_eq!(copy.transform_nodes(), original.transform_nodes());
    assert_eq!(copy.transform_nodes()[0].operand(), &scale);
    assert_eq!(copy.mask_nodes(), original.mask_nodes());

    copy.add_transform_node(Operation::Add, Node::vec3(0.0, 1.0, 0.0));
    original.add_mask_node(Node::boolean(true));
    assert_eq!(original.transform_nodes().len(), 1);
    assert_eq!(copy.transform_nodes().len(), 2);
    assert_eq!(copy.mask_nodes().len(), 1);

    original.build_material().unwrap();
    copy.build_material().unwrap();
    assert_eq!(copy.material().kind(), MaterialKind::Lit);

    // Geometry is shared, so new vertices show up in both.
    original
        .set_vertices(&[0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0, 0.0])
        .unwrap();
    assert_eq!(
        copy.geometry().borrow().positions().unwrap().vec3(1),
        Vec3::new(2.0, 0.0, 0.0)
    );
}

#[test]
fn built_shader_reads_declared_data() {
    let mut mesh = NodeMesh::new(
        PrimitiveKind::Points,
        MaterialKind::Lit,
        Geometry::points(&[Vec3::ZERO, Vec3::ONE]),
        vec![DataDescriptor::single("size", 1)],
    )
    .unwrap();
    let size = Node::attribute("size", nodemesh::NodeType::Float);
    mesh.add_alpha_node(Operation::Mul, size);
    mesh.build_material().unwrap();

    let shader = mesh.material().compiled().unwrap();
    assert_eq!(shader.attribute("position").unwrap().location, 0);
    assert!(shader.attribute("size").is_some());
    assert!(shader.source().contains("discard"));
}
