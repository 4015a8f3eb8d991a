use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const LOCATIONS: &str = "locations";
pub const STORIES: &str = "stories";

pub type LocationId = String;
pub type StoryId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    Entertainment,
    Attractions,
    Shopping,
    Restaurants,
    Nightlife,
    Information,
    Events,
    Transportation,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Entertainment,
        Category::Attractions,
        Category::Shopping,
        Category::Restaurants,
        Category::Nightlife,
        Category::Information,
        Category::Events,
        Category::Transportation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Entertainment => "Entertainment",
            Category::Attractions => "Attractions",
            Category::Shopping => "Shopping",
            Category::Restaurants => "Restaurants",
            Category::Nightlife => "Nightlife",
            Category::Information => "Information",
            Category::Events => "Events",
            Category::Transportation => "Transportation",
        }
    }

    pub fn parse_category(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_category(s).ok_or_else(|| {
            let names: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
            format!("unknown category '{}', expected one of: {}", s, names.join(", "))
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and within the WGS84 latitude/longitude ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// Parses the `"<lat>,<lng>"` form used on the command line and by position feeds.
impl FromStr for Coordinate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lng) = s
            .split_once(',')
            .ok_or_else(|| format!("expected '<lat>,<lng>', got '{}'", s))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid coordinate '{}': {}", part.trim(), e))
        };
        Ok(Self::new(parse(lat)?, parse(lng)?))
    }
}

/// Visible map region: center plus latitude/longitude deltas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub latitude: f64,
    pub longitude: f64,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl Viewport {
    pub fn new(center: Coordinate, latitude_delta: f64, longitude_delta: f64) -> Self {
        Self {
            latitude: center.latitude,
            longitude: center.longitude,
            latitude_delta,
            longitude_delta,
        }
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Same deltas, recentered on `center`.
    pub fn recentered(&self, center: Coordinate) -> Self {
        Self::new(center, self.latitude_delta, self.longitude_delta)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub id: LocationId,
    pub category: Category,
    pub title: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Location {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    pub fn attachment_state(&self) -> AttachmentState {
        AttachmentState::from_url(self.image.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Story {
    pub id: StoryId,
    pub user_id: String,
    pub title: String,
    pub text: String,
    pub location: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Story {
    pub fn attachment_state(&self) -> AttachmentState {
        AttachmentState::from_url(self.image.as_deref())
    }
}

/// Unvalidated input for a new location, as collected from the form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationDraft {
    pub title: String,
    pub category: Option<Category>,
    pub description: String,
    pub coordinate: Option<Coordinate>,
}

/// Unvalidated input for a new story scoped to a location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoryDraft {
    pub user_id: String,
    pub title: String,
    pub text: String,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttachmentState {
    Pending,
    Attached { url: String },
}

impl AttachmentState {
    fn from_url(url: Option<&str>) -> Self {
        match url {
            Some(url) if !url.is_empty() => AttachmentState::Attached {
                url: url.to_string(),
            },
            _ => AttachmentState::Pending,
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self, AttachmentState::Attached { .. })
    }
}

/// Which collection an uploaded asset belongs to; also the storage path prefix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResourceKind {
    Location,
    Story,
}

impl ResourceKind {
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Location => LOCATIONS,
            ResourceKind::Story => STORIES,
        }
    }

    /// Storage prefix, e.g. `/locations/`.
    pub fn storage_prefix(&self) -> String {
        format!("/{}/", self.collection())
    }
}

/// Local file picked from the gallery or camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    pub path: PathBuf,
}

impl ImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutboxKind {
    AttachLocationImage,
    AttachStoryImage,
}

impl OutboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxKind::AttachLocationImage => "attach_location_image",
            OutboxKind::AttachStoryImage => "attach_story_image",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "attach_location_image" => Some(OutboxKind::AttachLocationImage),
            "attach_story_image" => Some(OutboxKind::AttachStoryImage),
            _ => None,
        }
    }

    pub fn resource(&self) -> ResourceKind {
        match self {
            OutboxKind::AttachLocationImage => ResourceKind::Location,
            OutboxKind::AttachStoryImage => ResourceKind::Story,
        }
    }
}

impl From<ResourceKind> for OutboxKind {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Location => OutboxKind::AttachLocationImage,
            ResourceKind::Story => OutboxKind::AttachStoryImage,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutboxState {
    Queued,
    Abandoned,
}

impl OutboxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxState::Queued => "queued",
            OutboxState::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxTask {
    pub id: i64,
    pub kind: OutboxKind,
    pub ref_id: String,
    pub image_path: String,
    pub attempt: i32,
    pub due_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_is_case_insensitive() {
        assert_eq!(
            Category::parse_category(" nightlife "),
            Some(Category::Nightlife)
        );
        assert_eq!("Attractions".parse::<Category>(), Ok(Category::Attractions));
        assert!("Museums".parse::<Category>().is_err());
    }

    #[test]
    fn coordinate_parse() {
        let c: Coordinate = "10.5, -3".parse().unwrap();
        assert_eq!(c, Coordinate::new(10.5, -3.0));
        assert!("abc".parse::<Coordinate>().is_err());
        assert!("10.5".parse::<Coordinate>().is_err());
        assert!("1,2,3".parse::<Coordinate>().is_err());
    }

    #[test]
    fn coordinate_parse_accepts_float_syntax() {
        assert_eq!("+10,5".parse::<Coordinate>().unwrap(), Coordinate::new(10.0, 5.0));
        assert_eq!(".5,1".parse::<Coordinate>().unwrap(), Coordinate::new(0.5, 1.0));
        assert_eq!("1e-3,2".parse::<Coordinate>().unwrap(), Coordinate::new(0.001, 2.0));
    }

    #[test]
    fn coordinate_range() {
        assert!(Coordinate::new(90.0, -180.0).is_valid());
        assert!(!Coordinate::new(90.1, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn attachment_state_from_image_field() {
        assert_eq!(AttachmentState::from_url(None), AttachmentState::Pending);
        assert_eq!(AttachmentState::from_url(Some("")), AttachmentState::Pending);
        assert!(AttachmentState::from_url(Some("file:///a.jpg")).is_attached());
    }

    #[test]
    fn outbox_kind_round_trips_through_resource() {
        for kind in [ResourceKind::Location, ResourceKind::Story] {
            let ob = OutboxKind::from(kind);
            assert_eq!(ob.resource(), kind);
            assert_eq!(OutboxKind::parse_kind(ob.as_str()), Some(ob));
        }
        assert_eq!(ResourceKind::Story.storage_prefix(), "/stories/");
    }
}
