use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use vellum_scene::{
    apply_patch, reconcile_elements, validate_patch, ElementType, PatchOp, SceneElement,
    ScenePatch, SceneState,
};

fn scene_with_elements(n: usize) -> SceneState {
    let mut scene = SceneState::new();
    for i in 0..n {
        scene.elements.push(
            SceneElement::new(format!("el-{i}"), ElementType::Rectangle)
                .with_bounds(i as f32, 0.0, 10.0, 10.0),
        );
    }
    scene
}

fn bench_validate(c: &mut Criterion) {
    let raw = json!({
        "ops": [
            {"op": "add_element", "element": {"id": "r1", "type": "rectangle"}},
            {"op": "update_element", "id": "r1", "changes": {"x": 5.0}},
            {"op": "update_app_state", "changes": {"zoom": 2.0}},
        ]
    });

    c.bench_function("validate_patch_3_ops", |b| {
        b.iter(|| black_box(validate_patch(black_box(&raw)).unwrap()))
    });
}

fn bench_apply_update(c: &mut Criterion) {
    let scene = scene_with_elements(1000);
    let patch = ScenePatch::new(vec![PatchOp::UpdateElement {
        id: "el-500".to_string(),
        changes: serde_json::from_value(json!({"x": 99.0})).unwrap(),
    }]);

    c.bench_function("apply_update_1k_elements", |b| {
        b.iter(|| black_box(apply_patch(black_box(&scene), black_box(&patch))))
    });
}

fn bench_apply_replace(c: &mut Criterion) {
    let scene = scene_with_elements(1000);
    let patch = ScenePatch::new(vec![PatchOp::ReplaceElements {
        elements: scene_with_elements(1000).elements,
    }]);

    c.bench_function("apply_replace_1k_elements", |b| {
        b.iter(|| black_box(apply_patch(black_box(&scene), black_box(&patch))))
    });
}

fn bench_reconcile(c: &mut Criterion) {
    let local = scene_with_elements(1000).elements;
    let mut remote = scene_with_elements(1000).elements;
    for el in remote.iter_mut().take(100) {
        el.version = 5;
        el.x += 1.0;
    }

    c.bench_function("reconcile_1k_elements_100_changed", |b| {
        b.iter(|| black_box(reconcile_elements(black_box(&local), black_box(remote.clone()))))
    });
}

criterion_group!(
    benches,
    bench_validate,
    bench_apply_update,
    bench_apply_replace,
    bench_reconcile
);
criterion_main!(benches);
