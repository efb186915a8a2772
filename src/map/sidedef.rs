// src/map/sidedef.rs

/// A sidedef: one face of a linedef, bound to the sector it fronts.
#[derive(Debug, Clone, PartialEq)]
pub struct SideDef {
    /// Horizontal texture offset.
    pub x_offset: i32,

    /// Vertical texture offset.
    pub y_offset: i32,

    /// Upper texture name, up to 8 chars.
    pub upper_tex: String,

    /// Lower texture name, up to 8 chars.
    pub lower_tex: String,

    /// Middle (a.k.a. "mid" or "normal") texture name, up to 8 chars.
    pub mid_tex: String,

    /// Sector index for this sidedef.
    pub sector: i32,
}

impl SideDef {
    /// Creates a new sidedef in memory, with the specified field values.
    ///
    /// You can pass empty strings for the texture names if you want them
    /// blank, or something like `"-"` if you use special placeholders.
    pub fn new(
        x_offset: i32,
        y_offset: i32,
        upper_tex: String,
        lower_tex: String,
        mid_tex: String,
        sector: i32,
    ) -> Self {
        SideDef {
            x_offset,
            y_offset,
            upper_tex,
            lower_tex,
            mid_tex,
            sector,
        }
    }

    /// Convenience constructor for a bare sidedef that only references a
    /// sector, which is all the node builder ever looks at.
    pub fn with_sector(sector: i32) -> Self {
        SideDef::new(0, 0, String::new(), String::new(), String::new(), sector)
    }
}
