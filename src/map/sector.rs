// src/map/sector.rs

/// A sector: a region of the map with a floor and a ceiling.
///
/// The node builder treats sectors as opaque labels carried on sidedefs;
/// the plane heights and lighting only matter to the renderer and playsim.
#[derive(Debug, Clone, PartialEq)]
pub struct Sector {
    /// The floor height (in map units).
    pub floor_height: i32,

    /// The ceiling height (in map units).
    pub ceiling_height: i32,

    /// The name of the floor flat, up to 8 chars.
    pub floor_tex: String,

    /// The name of the ceiling flat, up to 8 chars.
    pub ceiling_tex: String,

    /// Light level (0-255).
    pub light: i32,

    /// Special type (a.k.a. "effect" or "sector type").
    pub r#type: i32,

    /// Sector tag, used to link linedefs, etc.
    pub tag: i32,
}

impl Sector {
    /// Creates a new sector in memory with the specified field values.
    pub fn new(
        floor_height: i32,
        ceiling_height: i32,
        floor_tex: String,
        ceiling_tex: String,
        light: i32,
        r#type: i32,
        tag: i32,
    ) -> Self {
        Sector {
            floor_height,
            ceiling_height,
            floor_tex,
            ceiling_tex,
            light,
            r#type,
            tag,
        }
    }

    /// Convenience constructor with neutral defaults.
    pub fn with_defaults() -> Self {
        Sector::new(0, 128, "FLOOR0_1".to_string(), "CEIL1_1".to_string(), 160, 0, 0)
    }
}
