use bevy_pbf_fluid::gpu::ffi::GPUField;
use bevy_pbf_fluid::{Field, PBFError, SdfGenerator, TriangleMesh};
use glam::Vec3;

fn unit_cube_field(resolution: usize) -> bevy_pbf_fluid::SdfField {
    SdfGenerator::new(resolution, 0.2)
        .generate(&TriangleMesh::cuboid(Vec3::splat(0.5)))
        .unwrap()
}

#[test]
fn bounds_are_padded_mesh_bounds() {
    let field = unit_cube_field(24);
    assert!((field.min_bb - Vec3::splat(-0.7)).abs().max_element() < 1e-5);
    assert!((field.max_bb - Vec3::splat(0.7)).abs().max_element() < 1e-5);
    assert_eq!(field.voxels.len(), 24 * 24 * 24);
}

#[test]
fn voxels_are_classified_by_ray_parity() {
    let res = 24;
    let field = unit_cube_field(res);
    for z in 0..res {
        for y in 0..res {
            for x in 0..res {
                let c = field.voxel_center(x, y, z);
                let v = field.voxel(x, y, z);
                let box_dist = c.abs().max_element();
                if box_dist < 0.499 {
                    assert!(v.inside, "voxel {x},{y},{z} at {c} should be inside");
                    assert!(v.distance < 0.0);
                } else if box_dist > 0.501 {
                    assert!(!v.inside, "voxel {x},{y},{z} at {c} should be outside");
                    assert!(v.distance > 0.0);
                }
            }
        }
    }
}

#[test]
fn voxel_distances_match_the_box() {
    let res = 16;
    let field = unit_cube_field(res);
    for (i, v) in field.voxels.iter().enumerate() {
        let (x, y, z) = (i % res, (i / res) % res, i / (res * res));
        let c = field.voxel_center(x, y, z);
        // exact signed distance of an axis aligned box
        let q = c.abs() - Vec3::splat(0.5);
        let exact = q.max(Vec3::ZERO).length() + q.max_element().min(0.0);
        assert!((v.distance - exact).abs() < 1e-4, "voxel {x},{y},{z}: {} vs {exact}", v.distance);
        assert!((v.normal.length() - 1.0).abs() < 1e-5);
    }
}

#[test]
fn sampling_inside_near_and_far() {
    let field = unit_cube_field(24);
    let step = field.voxel_size().x;

    assert!(field.contains(Vec3::ZERO) && field.contains(field.max_bb));
    assert!(!field.contains(Vec3::new(3.0, 0.0, 0.0)));

    let center = field.sample(Vec3::ZERO);
    assert!(center.inside);
    assert!(center.distance < -0.4);

    let near = field.sample(Vec3::new(0.6, 0.1, 0.05));
    assert!((near.distance - 0.1).abs() < step);
    assert!(near.normal.dot(Vec3::X) > 0.9);

    // beyond the grid the gap is added on top of the border sample
    let far = field.sample(Vec3::new(3.0, 0.0, 0.0));
    assert!(!far.inside);
    assert!((far.distance - 2.5).abs() < step);
    assert!((far.normal - Vec3::X).length() < 1e-5);
}

#[test]
fn degenerate_triangles_are_skipped() {
    let clean = TriangleMesh::cuboid(Vec3::splat(0.5));
    let mut noisy = clean.clone();
    noisy.indices.extend_from_slice(&[0, 0, 1, 2, 2, 2]);

    let generator = SdfGenerator::new(12, 0.1);
    let a = generator.generate(&clean).unwrap();
    let b = generator.generate(&noisy).unwrap();
    assert_eq!(a.voxels, b.voxels);
}

#[test]
fn unusable_meshes_are_rejected() {
    let generator = SdfGenerator::default();

    let collinear = TriangleMesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::X * 2.0], vec![0, 1, 2]);
    assert!(matches!(generator.generate(&collinear), Err(PBFError::EmptyMesh)));
    assert!(matches!(generator.generate(&TriangleMesh::default()), Err(PBFError::EmptyMesh)));

    let dangling = TriangleMesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1, 9]);
    assert!(matches!(
        generator.generate(&dangling),
        Err(PBFError::InvalidMeshIndex { index: 9, vertex_count: 3 })
    ));

    let too_coarse = SdfGenerator::new(1, 0.1);
    assert!(matches!(
        too_coarse.generate(&TriangleMesh::cuboid(Vec3::ONE)),
        Err(PBFError::InvalidConfig(_))
    ));
}

#[test]
fn gpu_field_layout() {
    assert_eq!(std::mem::size_of::<GPUField>(), 32);

    let far = GPUField::from(&Field::default());
    assert_eq!(far.distance, f32::MAX);
    assert_eq!(far.inside, 0);

    let solid = GPUField::from(&Field { normal: Vec3::Y, distance: -0.25, inside: true });
    assert_eq!(solid.normal, [0.0, 1.0, 0.0, 0.0]);
    assert_eq!(solid.distance, -0.25);
    assert_eq!(solid.inside, 1);
    assert_eq!(bytemuck::bytes_of(&solid).len(), 32);

    let field = unit_cube_field(8);
    let exported = field.gpu_fields();
    assert_eq!(bytemuck::cast_slice::<_, u8>(&exported).len(), 8 * 8 * 8 * 32);
    assert_eq!(exported[0].inside, 0);
}
