//! Viewport visibility filter for map markers.
//!
//! The visible window is wider than the viewport itself: each half-extent is
//! `delta / VISIBILITY_DIVISOR`, which leaves a margin of markers just off
//! screen already rendered while the user pans.
use crate::model::{Coordinate, Location, Viewport};

pub const VISIBILITY_DIVISOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Coordinate,
    pub max: Coordinate,
}

impl BoundingBox {
    pub fn from_viewport(viewport: &Viewport) -> Self {
        let half_lat = viewport.latitude_delta / VISIBILITY_DIVISOR;
        let half_lng = viewport.longitude_delta / VISIBILITY_DIVISOR;
        Self {
            min: Coordinate::new(viewport.latitude - half_lat, viewport.longitude - half_lng),
            max: Coordinate::new(viewport.latitude + half_lat, viewport.longitude + half_lng),
        }
    }

    /// Inclusive on both ends of both axes.
    pub fn contains(&self, point: Coordinate) -> bool {
        point.latitude >= self.min.latitude
            && point.latitude <= self.max.latitude
            && point.longitude >= self.min.longitude
            && point.longitude <= self.max.longitude
    }
}

/// An item tagged with whether it fell inside the window.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotated<T> {
    pub item: T,
    pub is_visible: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleSet {
    /// Visible locations, input order.
    pub visible: Vec<Location>,
    /// Every input location, input order, with its flag.
    pub annotated: Vec<Annotated<Location>>,
}

impl VisibleSet {
    pub fn visible_titles(&self) -> Vec<&str> {
        self.visible.iter().map(|l| l.title.as_str()).collect()
    }
}

pub fn compute_visible(viewport: &Viewport, locations: &[Location]) -> VisibleSet {
    let window = BoundingBox::from_viewport(viewport);
    let mut out = VisibleSet::default();
    for location in locations {
        let is_visible = window.contains(location.coordinate());
        if is_visible {
            out.visible.push(location.clone());
        }
        out.annotated.push(Annotated {
            item: location.clone(),
            is_visible,
        });
    }
    tracing::debug!(visible = ?out.visible_titles(), "computed visible markers");
    out
}
