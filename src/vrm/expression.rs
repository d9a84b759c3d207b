//! Expression weights → per-mesh morph target weights.

use super::loader::VrmModel;

/// Resolve expression weights (indexed like `rig.expressions`) into morph
/// weights per mesh. Binary expressions snap to 0 or 1 at 0.5; overlapping
/// binds add up and are clamped to `0..=1`.
pub fn morph_weights(model: &VrmModel, expression_weights: &[f32]) -> Vec<Vec<f32>> {
    let mut out: Vec<Vec<f32>> = model
        .meshes
        .iter()
        .map(|m| vec![0.0; m.morph_target_count()])
        .collect();

    let Some(rig) = &model.rig else {
        return out;
    };

    for (expr, &weight) in rig.expressions.iter().zip(expression_weights) {
        let weight = if expr.is_binary {
            if weight >= 0.5 {
                1.0
            } else {
                0.0
            }
        } else {
            weight
        };
        if weight <= 0.0 {
            continue;
        }

        for bind in &expr.binds {
            if let Some(slot) = out.get_mut(bind.mesh).and_then(|w| w.get_mut(bind.morph_index)) {
                *slot += bind.weight * weight;
            }
        }
    }

    for w in out.iter_mut().flatten() {
        *w = w.clamp(0.0, 1.0);
    }
    out
}
