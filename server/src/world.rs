//! World grid generation and walkability queries.
//!
//! The grid is generated exactly once at process start and never mutated
//! afterwards; every session shares it read-only through an `Arc`. The only
//! mutation point is the spawn-area carving hook, which runs before the grid
//! is handed out.

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::Tile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("no walkable tile found after {attempts} attempts")]
    SpawnSearchExhausted { attempts: u32 },
}

/// Weighted tile distribution used during generation. The default matches
/// the classic overworld mix: mostly land with scattered water.
#[derive(Debug, Clone)]
pub struct TileWeights {
    pub entries: Vec<(Tile, f64)>,
}

impl Default for TileWeights {
    fn default() -> Self {
        TileWeights {
            entries: vec![(Tile::Land, 0.8), (Tile::Water, 0.2)],
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorldGrid {
    width: usize,
    height: usize,
    tiles: Vec<Vec<Tile>>,
}

impl WorldGrid {
    /// Samples each cell independently from the weighted distribution.
    pub fn generate(width: usize, height: usize, weights: &TileWeights) -> Self {
        let mut rng = rand::thread_rng();
        let tiles: Vec<Vec<Tile>> = (0..height)
            .map(|_| {
                (0..width)
                    .map(|_| {
                        weights
                            .entries
                            .choose_weighted(&mut rng, |(_, weight)| *weight)
                            .map(|(tile, _)| *tile)
                            .unwrap_or(Tile::Land)
                    })
                    .collect()
            })
            .collect();

        debug!("generated {width}x{height} world grid");
        WorldGrid {
            width,
            height,
            tiles,
        }
    }

    /// Builds a grid from explicit rows. Rows must be rectangular.
    pub fn from_tiles(tiles: Vec<Vec<Tile>>) -> Self {
        let height = tiles.len();
        let width = tiles.first().map(Vec::len).unwrap_or(0);
        debug_assert!(tiles.iter().all(|row| row.len() == width));
        WorldGrid {
            width,
            height,
            tiles,
        }
    }

    /// Forces a walkable safe zone of land around `(cx, cy)` and marks the
    /// center as the spawn tile. Runs before the grid is shared.
    pub fn carve_spawn_area(&mut self, cx: i32, cy: i32, radius: i32) {
        for y in (cy - radius)..=(cy + radius) {
            for x in (cx - radius)..=(cx + radius) {
                if x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height {
                    self.tiles[y as usize][x as usize] = Tile::Land;
                }
            }
        }
        if cx >= 0 && cy >= 0 && (cx as usize) < self.width && (cy as usize) < self.height {
            self.tiles[cy as usize][cx as usize] = Tile::Spawn;
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn tile(&self, x: i32, y: i32) -> Option<Tile> {
        if x < 0 || y < 0 {
            return None;
        }
        self.tiles
            .get(y as usize)
            .and_then(|row| row.get(x as usize))
            .copied()
    }

    /// True iff `(x, y)` is in bounds and its tile permits occupancy.
    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        self.tile(x, y).map(Tile::is_walkable).unwrap_or(false)
    }

    /// Clamps coordinates to grid bounds.
    pub fn clamp(&self, x: i32, y: i32) -> (i32, i32) {
        if self.width == 0 || self.height == 0 {
            return (0, 0);
        }
        (
            x.clamp(0, self.width as i32 - 1),
            y.clamp(0, self.height as i32 - 1),
        )
    }

    /// Bounded rejection sampling over uniform coordinates. Callers fall
    /// back to the fixed default spawn when this fails.
    pub fn random_walkable_tile(&self, max_attempts: u32) -> Result<(i32, i32), WorldError> {
        if self.width == 0 || self.height == 0 {
            return Err(WorldError::SpawnSearchExhausted {
                attempts: max_attempts,
            });
        }

        let mut rng = rand::thread_rng();
        for _ in 0..max_attempts {
            let x = rng.gen_range(0..self.width) as i32;
            let y = rng.gen_range(0..self.height) as i32;
            if self.is_walkable(x, y) {
                return Ok((x, y));
            }
        }

        Err(WorldError::SpawnSearchExhausted {
            attempts: max_attempts,
        })
    }

    /// The full tile rows, in the shape the `state` event broadcasts.
    pub fn rows(&self) -> &Vec<Vec<Tile>> {
        &self.tiles
    }
}
