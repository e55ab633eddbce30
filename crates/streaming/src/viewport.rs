use foundation::BoundingBox;
use serde::{Deserialize, Serialize};

/// Visible map rectangle plus zoom level. Immutable; replaced wholesale on
/// every settle.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub zoom: f64,
}

impl Viewport {
    pub const fn new(west: f64, south: f64, east: f64, north: f64, zoom: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
            zoom,
        }
    }

    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(self.west, self.south, self.east, self.north)
    }
}

impl Default for Viewport {
    /// Contiguous United States at zoom 4.
    fn default() -> Self {
        Self::new(-125.0, 24.0, -66.0, 50.0, 4.0)
    }
}

type SettleCallback = Box<dyn FnMut(&Viewport) + Send>;

/// Owns the live viewport and turns gesture streams into settle events.
///
/// Map engines report many intermediate viewports while a pan or zoom is in
/// progress. `move_to` records them; `settle` is called once the gesture ends
/// and notifies listeners with the final value. A settle with no gesture
/// since the last one notifies nobody. A gesture that ends where it started
/// still notifies, so panning away and back re-requests the view.
pub struct ViewportTracker {
    current: Viewport,
    moving: bool,
    listeners: Vec<SettleCallback>,
}

impl ViewportTracker {
    pub fn new(initial: Viewport) -> Self {
        Self {
            current: initial,
            moving: false,
            listeners: Vec::new(),
        }
    }

    pub fn current(&self) -> Viewport {
        self.current
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub fn on_settle(&mut self, callback: impl FnMut(&Viewport) + Send + 'static) {
        self.listeners.push(Box::new(callback));
    }

    /// Records an intermediate viewport of an ongoing gesture.
    pub fn move_to(&mut self, viewport: Viewport) {
        self.current = viewport;
        self.moving = true;
    }

    /// Ends the current gesture. Returns the settled viewport if listeners
    /// were notified.
    pub fn settle(&mut self) -> Option<Viewport> {
        if !std::mem::take(&mut self.moving) {
            return None;
        }
        for listener in &mut self.listeners {
            listener(&self.current);
        }
        Some(self.current)
    }

    /// `move_to` followed by `settle`, for engines that only report final
    /// positions.
    pub fn jump_to(&mut self, viewport: Viewport) -> Option<Viewport> {
        self.move_to(viewport);
        self.settle()
    }
}

impl std::fmt::Debug for ViewportTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewportTracker")
            .field("current", &self.current)
            .field("moving", &self.moving)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
