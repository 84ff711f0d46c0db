//! Spawn placement planner
//!
//! Two tiers:
//! - up to `SMALL_BATCH` items: preset columns in shuffled order, each on its
//!   own row above the visible area
//! - larger batches: rejection sampling with a fixed attempt budget, falling
//!   back to a deterministic grid that satisfies the gaps by construction
//!
//! Two points conflict when they are closer than `min_x_gap` horizontally AND
//! closer than `min_y_gap` vertically. Every plan is conflict-free.

use glam::Vec2;
use rand::Rng;
use rand::seq::SliceRandom;

use crate::consts::{PLAY_X_MAX, PLAY_X_MIN, SPAWN_Y_TOP};

/// Batches up to this size use the preset columns
pub const SMALL_BATCH: usize = 5;

/// Evenly spaced columns across the play width
pub const PRESET_COLUMNS: [f32; SMALL_BATCH] = [12.0, 31.0, 50.0, 69.0, 88.0];

/// Candidate draws before giving up on random placement
pub const MAX_ATTEMPTS: usize = 200;

/// Keeps float rounding from eating into a gap
const GAP_PAD: f32 = 0.01;

/// True if the two points would overlap at spawn time
#[inline]
pub fn conflicts(a: Vec2, b: Vec2, min_x_gap: f32, min_y_gap: f32) -> bool {
    (a.x - b.x).abs() < min_x_gap && (a.y - b.y).abs() < min_y_gap
}

/// Plan `count` spawn points
pub fn plan<R: Rng + ?Sized>(count: usize, min_x_gap: f32, min_y_gap: f32, rng: &mut R) -> Vec<Vec2> {
    let min_x_gap = min_x_gap.max(0.0);
    let min_y_gap = min_y_gap.max(0.0);

    if count == 0 {
        return Vec::new();
    }
    if count <= SMALL_BATCH {
        return preset_columns(count, min_y_gap, rng);
    }

    match rejection_sample(count, min_x_gap, min_y_gap, rng) {
        Some(points) => points,
        None => {
            log::debug!("Placement budget exhausted for {} items, using grid", count);
            grid(count, min_x_gap, min_y_gap)
        }
    }
}

fn preset_columns<R: Rng + ?Sized>(count: usize, min_y_gap: f32, rng: &mut R) -> Vec<Vec2> {
    let mut columns = PRESET_COLUMNS;
    columns.shuffle(rng);

    let mut rows: Vec<usize> = (0..count).collect();
    rows.shuffle(rng);

    let row_step = min_y_gap + GAP_PAD;
    columns
        .iter()
        .zip(rows)
        .map(|(&x, row)| Vec2::new(x, SPAWN_Y_TOP - row as f32 * row_step))
        .collect()
}

fn rejection_sample<R: Rng + ?Sized>(
    count: usize,
    min_x_gap: f32,
    min_y_gap: f32,
    rng: &mut R,
) -> Option<Vec<Vec2>> {
    // Band tall enough that one item per row always fits
    let band = (count as f32 * min_y_gap).max(1.0);
    let mut points: Vec<Vec2> = Vec::with_capacity(count);

    for _ in 0..MAX_ATTEMPTS {
        let candidate = Vec2::new(
            rng.random_range(PLAY_X_MIN..=PLAY_X_MAX),
            SPAWN_Y_TOP - rng.random_range(0.0..=band),
        );
        if points
            .iter()
            .all(|&p| !conflicts(p, candidate, min_x_gap, min_y_gap))
        {
            points.push(candidate);
            if points.len() == count {
                return Some(points);
            }
        }
    }
    None
}

/// Row-major grid: same-row neighbours are a full x gap apart, rows a full y
/// gap apart
fn grid(count: usize, min_x_gap: f32, min_y_gap: f32) -> Vec<Vec2> {
    let width = PLAY_X_MAX - PLAY_X_MIN;
    let x_step = min_x_gap + GAP_PAD;
    let columns = ((width / x_step).floor() as usize + 1).clamp(1, count);
    let row_step = min_y_gap + GAP_PAD;

    (0..count)
        .map(|i| {
            let column = i % columns;
            let row = i / columns;
            Vec2::new(
                PLAY_X_MIN + column as f32 * x_step,
                SPAWN_Y_TOP - row as f32 * row_step,
            )
        })
        .collect()
}
