use std::collections::HashMap;

use rayon::prelude::*;

use crate::simulation::rooms::{Rooms, RoomsState};

/// Density ramp for belief particles on a cell.
const CHARS: [char; 7] = ['.', ':', '-', '=', '+', '*', '@'];

/// Renders the map with walls, the goal and the particle density of the
/// current root belief.
#[must_use]
pub fn compute_field_grid(rooms: &Rooms, particles: &[RoomsState]) -> Vec<String> {
    let mut counts: HashMap<(usize, usize), usize> = HashMap::new();
    for particle in particles {
        *counts.entry((particle.x, particle.y)).or_default() += 1;
    }
    let heaviest = counts.values().copied().max().unwrap_or(1);

    // Use rayon to compute rows in parallel
    (0..rooms.height())
        .into_par_iter()
        .map(|y| {
            let mut line = String::with_capacity(rooms.width());
            for x in 0..rooms.width() {
                let symbol = if rooms.is_wall(x, y) {
                    '#'
                } else if (x, y) == rooms.goal() {
                    'G'
                } else if let Some(&count) = counts.get(&(x, y)) {
                    // Map density 0..heaviest onto the ramp
                    let idx = (count * (CHARS.len() - 1)).div_ceil(heaviest);
                    CHARS[idx.min(CHARS.len() - 1)]
                } else {
                    ' '
                };
                line.push(symbol);
            }
            line
        })
        .collect()
}
