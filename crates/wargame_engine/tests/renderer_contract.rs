//! Contract tests run through `&mut dyn Renderer` on the headless backend
//!
//! Every backend shares the same frontend, so these pin the observable behaviour scene code
//! relies on: matrix balance, buffer ownership, index bounds, per-object occlusion, scoped
//! render targets, slot independence and sub-mesh partitioning.

use std::collections::HashSet;

use approx::assert_relative_eq;
use wargame_engine::assets::ModelData;
use wargame_engine::foundation::math::{Vec2, Vec3};
use wargame_engine::render::backends::headless::HeadlessCommand;
use wargame_engine::render::mesh::{Material, MaterialManager, MeshPart, Model};
use wargame_engine::render::vertex::VertexArrays;
use wargame_engine::render::{
    CachedTextureType, Color, HeadlessRenderer, RenderError, RenderMode, Renderer, TextureSlot, Viewport, ViewportRect,
};
use wargame_engine::scene::{GameModel, GameObject};

const TRIANGLE: [f32; 9] = [-0.5, -0.5, 0.0, 0.5, -0.5, 0.0, 0.0, 0.5, 0.0];

fn renderer() -> HeadlessRenderer {
    HeadlessRenderer::headless(640, 480).unwrap()
}

fn material(diffuse: [f32; 4]) -> Material {
    Material { diffuse, ..Material::default() }
}

#[test]
fn test_matrix_stack_balance_restores_model_view() {
    let mut engine = renderer();
    let renderer: &mut dyn Renderer = &mut engine;
    renderer.look_at(Vec3::new(0.0, -10.0, 10.0), Vec3::zeros(), Vec3::new(0.0, 0.0, 1.0));
    let before = renderer.view_matrix();

    for i in 0..8 {
        renderer.push_matrix();
        renderer.translate(i as f32, 1.0, -2.0);
        renderer.rotate(15.0 * i as f32, 0.0, 0.0, 1.0);
        renderer.scale(1.5);
    }
    assert_eq!(renderer.matrix_depth(), 9);
    for _ in 0..8 {
        renderer.pop_matrix().unwrap();
    }

    assert_eq!(renderer.view_matrix(), before);
    assert!(matches!(renderer.pop_matrix(), Err(RenderError::InvalidOperation(_))));
    assert_eq!(renderer.matrix_depth(), 1);
}

#[test]
fn test_temp_buffer_references_caller_arrays() {
    let mut engine = renderer();
    let positions = TRIANGLE.to_vec();
    let arrays = VertexArrays::separate(&positions, &[], &[]).unwrap();
    let buffer = engine.create_temp_vertex_buffer(arrays).unwrap();

    let streamed = buffer.arrays().unwrap().positions().data;
    assert_eq!(streamed.as_ptr(), positions.as_ptr());
    assert!(!buffer.is_resident());
    engine.draw_all(&buffer, 3).unwrap();
    assert_eq!(engine.backend().draws().last().unwrap().element_count, 3);
}

#[test]
fn test_persistent_buffer_ignores_later_source_changes() {
    let mut engine = renderer();
    let mut positions = TRIANGLE.to_vec();
    let buffer = {
        let arrays = VertexArrays::separate(&positions, &[], &[]).unwrap();
        engine.create_vertex_buffer(&arrays).unwrap()
    };
    positions.iter_mut().for_each(|p| *p += 100.0);

    engine.draw_all(&buffer, 3).unwrap();
    let persistent = engine.backend().draws().last().unwrap().clip_positions.clone();

    let original = VertexArrays::separate(&TRIANGLE, &[], &[]).unwrap();
    let reference = engine.create_temp_vertex_buffer(original).unwrap();
    engine.draw_all(&reference, 3).unwrap();
    let expected = engine.backend().draws().last().unwrap().clip_positions.clone();

    assert!(buffer.is_resident());
    for (actual, expected) in persistent.iter().zip(&expected) {
        assert_relative_eq!(actual, expected, epsilon = 1e-5);
    }
}

#[test]
fn test_draw_indexes_past_the_end_fails() {
    let mut engine = renderer();
    let renderer: &mut dyn Renderer = &mut engine;
    let arrays = VertexArrays::separate(&TRIANGLE, &[], &[]).unwrap();
    let mut buffer = renderer.create_vertex_buffer(&arrays).unwrap();
    renderer.set_index_buffer(&mut buffer, &[0, 1, 2, 2, 1, 0]).unwrap();

    renderer.draw_indexes(&buffer, 3, 3).unwrap();
    let error = renderer.draw_indexes(&buffer, 3, 4).unwrap_err();
    assert!(matches!(error, RenderError::IndexOutOfRange { begin: 3, count: 4, len: 6 }));
    assert!(renderer.draw_arrays(&buffer, RenderMode::Triangles, 4).is_err());
}

#[test]
fn test_identical_objects_have_independent_queries() {
    let mut engine = renderer();
    engine.backend_mut().set_visibility_predicate(|eye| eye.iter().all(|p| p.x < 0.0));

    let mut model = GameModel::new();
    let left = model.add_object(GameObject::new("tank.obj", Vec3::new(-5.0, 0.0, 0.0), 0.0));
    let right = model.add_object(GameObject::new("tank.obj", Vec3::new(5.0, 0.0, 0.0), 0.0));
    let arrays = VertexArrays::separate(&TRIANGLE, &[], &[]).unwrap();
    let buffer = engine.create_vertex_buffer(&arrays).unwrap();

    let mut viewport = Viewport::new(ViewportRect::new(0, 0, 640, 480), 60.0);
    viewport
        .draw(&mut engine, &mut |r, viewport, _| {
            r.reset_view_matrix();
            for key in [left, right] {
                let position = model.object(key).unwrap().position;
                let query = viewport.occlusion_query(r, key)?;
                query.query(r, true, &mut |r| {
                    r.push_matrix();
                    r.translate(position.x, position.y, position.z);
                    let drawn = r.draw_all(&buffer, 3);
                    drawn.and(r.pop_matrix())
                })?;
            }
            Ok(())
        })
        .unwrap();

    let visible = |viewport: &mut Viewport, engine: &mut HeadlessRenderer, key| {
        viewport.occlusion_query(engine, key).map(|q| q.is_visible()).unwrap()
    };
    assert!(visible(&mut viewport, &mut engine, left));
    assert!(!visible(&mut viewport, &mut engine, right));
}

#[test]
fn test_render_to_texture_restores_state() {
    let mut engine = renderer();
    let renderer: &mut dyn Renderer = &mut engine;
    renderer.set_up_viewport(ViewportRect::new(10, 20, 300, 200), 45.0, 1.0, 500.0);
    renderer.translate(1.0, 2.0, 3.0);
    let mut target = renderer.create_texture(None, 64, 64, CachedTextureType::RenderTarget).unwrap();
    let rect = renderer.viewport_rect();
    let projection = renderer.projection_matrix();
    let view = renderer.view_matrix();

    renderer
        .render_to_texture(&mut target, 64, 64, &mut |r| {
            assert_eq!(r.viewport_rect(), ViewportRect::new(0, 0, 64, 64));
            r.render_arrays(RenderMode::Triangles, &[Vec3::zeros(), Vec3::x(), Vec3::y()], &[], &[])
        })
        .unwrap();
    assert_eq!(renderer.viewport_rect(), rect);
    assert_eq!(renderer.projection_matrix(), projection);
    assert_eq!(renderer.view_matrix(), view);

    let failed = renderer.render_to_texture(&mut target, 64, 64, &mut |r| {
        r.push_matrix();
        r.translate(9.0, 9.0, 9.0);
        Err(RenderError::RenderingFailed("callback failed".to_string()))
    });
    assert!(failed.is_err());
    assert_eq!(renderer.viewport_rect(), rect);
    assert_eq!(renderer.projection_matrix(), projection);
    assert_eq!(renderer.view_matrix(), view);
    assert_eq!(renderer.matrix_depth(), 1);
    assert_eq!(engine.backend().render_target(), None);
}

#[test]
fn test_unbinding_one_slot_keeps_the_others() {
    let mut engine = renderer();
    let renderer: &mut dyn Renderer = &mut engine;
    let diffuse = renderer.create_texture(Some(&[255; 16]), 2, 2, CachedTextureType::Rgba).unwrap();
    let specular = renderer.create_texture(Some(&[128; 16]), 2, 2, CachedTextureType::Rgba).unwrap();
    renderer.set_texture_handle(&diffuse, TextureSlot::Diffuse).unwrap();
    renderer.set_texture_handle(&specular, TextureSlot::Specular).unwrap();

    renderer.unbind_texture(TextureSlot::Specular);

    assert_eq!(renderer.bound_texture(TextureSlot::Diffuse), Some(diffuse.id()));
    assert_eq!(renderer.bound_texture(TextureSlot::Specular), None);
    let last_bind = engine.backend().commands().iter().rev().find(|c| matches!(c, HeadlessCommand::BindTexture { .. }));
    assert_eq!(last_bind, Some(&HeadlessCommand::BindTexture { slot: TextureSlot::Specular, texture: None }));
}

#[test]
fn test_submesh_ranges_match_manual_draws() {
    let mut engine = renderer();
    let mut materials = MaterialManager::new();
    materials.add("red", material([1.0, 0.0, 0.0, 1.0]));
    materials.add("blue", material([0.0, 0.0, 1.0, 1.0]));
    let data = ModelData {
        vertices: vec![Vec3::new(-0.5, -0.5, 0.0), Vec3::new(0.5, -0.5, 0.0), Vec3::new(0.0, 0.5, 0.0)],
        tex_coords: vec![Vec2::zeros(), Vec2::x(), Vec2::y()],
        indexes: (0..450).map(|i| i % 3).collect(),
        parts: vec![MeshPart::new(0, "red", "hull"), MeshPart::new(300, "blue", "turret")],
        materials,
        ..ModelData::default()
    };
    let model = Model::new(&mut engine, &data).unwrap();
    // Same starting uniforms for both runs, so upload flags match too
    let prime = |engine: &mut HeadlessRenderer| {
        engine.reset_view_matrix();
        engine.set_color(Color::rgb(0.5, 0.5, 0.5));
        engine.backend_mut().take_commands();
    };

    prime(&mut engine);
    model.draw(&mut engine, &HashSet::new(), false, &[]).unwrap();
    let partitioned = engine.backend_mut().take_commands();

    prime(&mut engine);
    for (name, begin, count) in [("red", 0, 300), ("blue", 300, 150)] {
        model.materials().get(name).unwrap().apply(&mut engine, &[]).unwrap();
        engine.draw_indexes(model.buffer(), begin, count).unwrap();
    }
    engine.set_material(&Material::default());
    let manual = engine.backend_mut().take_commands();

    assert_eq!(partitioned, manual);
    let draws: Vec<_> = partitioned
        .iter()
        .filter_map(|c| match c {
            HeadlessCommand::Draw(record) => Some((record.first_index, record.element_count, record.diffuse.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        draws,
        vec![(Some(0), 300, Some(vec![1.0, 0.0, 0.0, 1.0])), (Some(300), 150, Some(vec![0.0, 0.0, 1.0, 1.0]))]
    );
    assert!(partitioned.contains(&HeadlessCommand::BindTexture { slot: TextureSlot::Diffuse, texture: None }));

    let hidden: HashSet<String> = ["turret".to_string()].into();
    prime(&mut engine);
    model.draw(&mut engine, &hidden, false, &[]).unwrap();
    let summary: Vec<_> = engine.backend().draws().map(|d| (d.mode, d.first_index, d.element_count)).collect();
    assert_eq!(summary, vec![(RenderMode::Triangles, Some(0), 300)]);
}
