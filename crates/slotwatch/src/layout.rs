//! Grid geometry, the layout generation clock, and the display-surface seam.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::SurfaceId;

/// Pixel rectangle inside the display area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// Where a slot's surface sits and whether it is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub rect: Rect,
    pub visible: bool,
}

impl Placement {
    pub fn shown(rect: Rect) -> Self {
        Self { rect, visible: true }
    }

    /// Same geometry, hidden.
    pub fn hidden(self) -> Self {
        Self {
            visible: false,
            ..self
        }
    }
}

/// Near-square grid for a slot count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    pub slots: usize,
    pub rows: usize,
    pub cols: usize,
}

impl GridLayout {
    /// `cols = ceil(sqrt(n))`, `rows = ceil(n / cols)`. 4 → 2x2, 9 → 3x3, 6 → 2x3.
    pub fn for_slots(slots: usize) -> Self {
        let slots = slots.max(1);
        let mut cols = 1;
        while cols * cols < slots {
            cols += 1;
        }
        let rows = slots.div_ceil(cols);
        Self { slots, rows, cols }
    }

    /// Cell rectangle of `index` in row-major order. The last row/column
    /// absorbs the remainder pixels so the cells tile the area exactly.
    pub fn cell(&self, area: Rect, index: usize) -> Rect {
        let row = (index / self.cols) as u32;
        let col = (index % self.cols) as u32;
        let rows = self.rows as u32;
        let cols = self.cols as u32;

        let cell_w = area.width / cols;
        let cell_h = area.height / rows;
        let width = if col + 1 == cols { area.width - cell_w * col } else { cell_w };
        let height = if row + 1 == rows { area.height - cell_h * row } else { cell_h };

        Rect {
            x: area.x + cell_w * col,
            y: area.y + cell_h * row,
            width,
            height,
        }
    }
}

/// Layout generation counter shared by the pool and every slot's callbacks.
///
/// `current` is bumped on every build and full-screen change. `build` holds
/// the generation at which the current set of slots was created; callbacks
/// captured before it belong to slots that no longer exist.
#[derive(Debug, Default)]
pub struct LayoutClock {
    current: AtomicU64,
    build: AtomicU64,
}

impl LayoutClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn build_generation(&self) -> u64 {
        self.build.load(Ordering::Acquire)
    }

    /// Advance and return the new generation.
    pub fn bump(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn mark_build(&self, generation: u64) {
        self.build.store(generation, Ordering::Release);
    }

    /// True if something captured at `generation` still refers to live slots.
    pub fn is_current_build(&self, generation: u64) -> bool {
        generation >= self.build_generation()
    }
}

/// The display layer. Implementations must be cheap and non-blocking; they
/// are called with no orchestration locks held but from async tasks.
pub trait SurfaceHost: Send + Sync {
    /// Surface the SDK should render slot `slot` into.
    fn surface(&self, slot: usize) -> SurfaceId;

    /// Move/resize/show/hide a slot's surface.
    fn place(&self, slot: usize, placement: Placement);

    /// Paint the slot blank.
    fn clear(&self, slot: usize);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_shapes() {
        let shapes: Vec<_> = [1, 2, 4, 6, 9, 10, 16]
            .iter()
            .map(|&n| {
                let g = GridLayout::for_slots(n);
                (g.rows, g.cols)
            })
            .collect();
        assert_eq!(shapes, vec![(1, 1), (1, 2), (2, 2), (2, 3), (3, 3), (3, 4), (4, 4)]);
    }

    #[test]
    fn test_cells_tile_area() {
        let area = Rect::new(0, 0, 1000, 601);
        let grid = GridLayout::for_slots(9);

        let last = grid.cell(area, 8);
        assert_eq!(last.x + last.width, 1000);
        assert_eq!(last.y + last.height, 601);

        let first = grid.cell(area, 0);
        assert_eq!(first, Rect::new(0, 0, 333, 200));

        let total: u64 = (0..9)
            .map(|i| {
                let r = grid.cell(area, i);
                r.width as u64 * r.height as u64
            })
            .sum();
        assert_eq!(total, 1000 * 601);
    }

    #[test]
    fn test_clock_build_generation() {
        let clock = LayoutClock::new();
        let g1 = clock.bump();
        clock.mark_build(g1);
        assert!(clock.is_current_build(g1));

        // full-screen toggles do not supersede the build
        let g2 = clock.bump();
        assert!(clock.is_current_build(g1));
        assert!(clock.is_current_build(g2));

        let g3 = clock.bump();
        clock.mark_build(g3);
        assert!(!clock.is_current_build(g2));
        assert_eq!(clock.current(), 3);
    }
}
