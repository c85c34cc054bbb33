//! Stage Geometry
//!
//! Static level layout, loaded once per session and shared read-only by
//! every fighter (wrap in `Arc` to share between rooms).

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::core::hash::{StateHash, StateHasher};

/// Platform identifier (lookup key only; fighters never own platforms).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlatformId(pub u16);

/// How a platform collides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    /// Full collision on every side.
    Solid,
    /// Land from above only; can be dropped through.
    Soft,
}

/// Axis-aligned rectangle given by its center.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Center X
    pub x: f64,
    /// Center Y
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl Rect {
    /// Create from center and size.
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Left edge.
    #[inline]
    pub fn left(&self) -> f64 {
        self.x - self.width / 2.0
    }

    /// Right edge.
    #[inline]
    pub fn right(&self) -> f64 {
        self.x + self.width / 2.0
    }

    /// Top edge (smaller y).
    #[inline]
    pub fn top(&self) -> f64 {
        self.y - self.height / 2.0
    }

    /// Bottom edge.
    #[inline]
    pub fn bottom(&self) -> f64 {
        self.y + self.height / 2.0
    }

    /// Strict AABB overlap (touching edges do not overlap).
    #[inline]
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.left() < other.right()
            && self.right() > other.left()
            && self.top() < other.bottom()
            && self.bottom() > other.top()
    }

    /// Horizontal extents overlap.
    #[inline]
    pub fn overlaps_x(&self, other: &Rect) -> bool {
        self.left() < other.right() && self.right() > other.left()
    }
}

/// A platform on the stage.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    /// Lookup id
    pub id: PlatformId,
    /// Collision mode
    pub kind: PlatformKind,
    /// Bounds
    pub rect: Rect,
}

/// Kill boundaries; leaving them costs a life.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlastZone {
    /// Left boundary
    pub left: f64,
    /// Right boundary
    pub right: f64,
    /// Top boundary
    pub top: f64,
    /// Bottom boundary
    pub bottom: f64,
}

impl BlastZone {
    /// Check whether a point is outside the zone.
    #[inline]
    pub fn is_outside(&self, p: Vec2) -> bool {
        p.x < self.left || p.x > self.right || p.y < self.top || p.y > self.bottom
    }
}

/// Static stage layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageGeometry {
    /// Left wall line (fighter body cannot cross)
    pub wall_left: f64,
    /// Right wall line
    pub wall_right: f64,
    /// Platforms, resolved in this order
    pub platforms: Vec<Platform>,
    /// Kill boundaries
    pub blast_zone: BlastZone,
    /// Spawn point per slot
    pub spawn_points: Vec<Vec2>,
}

impl StageGeometry {
    /// Default three-platform stage: one wide solid floor, two soft ledges.
    pub fn default_stage() -> Self {
        Self {
            wall_left: 150.0 + 22.5,
            wall_right: 1770.0 - 22.5,
            platforms: vec![
                Platform {
                    id: PlatformId(0),
                    kind: PlatformKind::Solid,
                    rect: Rect::new(960.0, 950.0, 1200.0, 40.0),
                },
                Platform {
                    id: PlatformId(1),
                    kind: PlatformKind::Soft,
                    rect: Rect::new(660.0, 700.0, 360.0, 24.0),
                },
                Platform {
                    id: PlatformId(2),
                    kind: PlatformKind::Soft,
                    rect: Rect::new(1260.0, 700.0, 360.0, 24.0),
                },
            ],
            blast_zone: BlastZone {
                left: -600.0,
                right: 1920.0 + 600.0,
                top: -600.0,
                bottom: 1080.0 + 600.0,
            },
            spawn_points: vec![
                Vec2::new(450.0, 300.0),
                Vec2::new(1470.0, 300.0),
                Vec2::new(960.0, 200.0),
                Vec2::new(960.0, 400.0),
            ],
        }
    }

    /// Look up a platform by id.
    ///
    /// Returns `None` for ids that are not on this stage; callers treat that
    /// as a no-op.
    pub fn platform(&self, id: PlatformId) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.id == id)
    }

    /// Spawn point for a slot; falls back to stage center-top.
    pub fn spawn_point(&self, slot: usize) -> Vec2 {
        self.spawn_points
            .get(slot)
            .copied()
            .unwrap_or(Vec2::new((self.wall_left + self.wall_right) / 2.0, 300.0))
    }

    /// Fingerprint of the layout, sent to clients on join.
    pub fn hash(&self) -> StateHash {
        let mut hasher = StateHasher::new(b"DUEL_ARENA_STAGE_V1");
        hasher.update_f64(self.wall_left);
        hasher.update_f64(self.wall_right);
        hasher.update_u32(self.platforms.len() as u32);
        for p in &self.platforms {
            hasher.update_u32(p.id.0 as u32);
            hasher.update_bool(p.kind == PlatformKind::Soft);
            hasher.update_f64(p.rect.x);
            hasher.update_f64(p.rect.y);
            hasher.update_f64(p.rect.width);
            hasher.update_f64(p.rect.height);
        }
        hasher.update_f64(self.blast_zone.left);
        hasher.update_f64(self.blast_zone.right);
        hasher.update_f64(self.blast_zone.top);
        hasher.update_f64(self.blast_zone.bottom);
        hasher.update_u32(self.spawn_points.len() as u32);
        for spawn in &self.spawn_points {
            hasher.update_f64(spawn.x);
            hasher.update_f64(spawn.y);
        }
        hasher.finalize()
    }
}

impl Default for StageGeometry {
    fn default() -> Self {
        Self::default_stage()
    }
}
