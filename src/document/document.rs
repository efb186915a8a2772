// src/document/document.rs

use crate::bsp::bsp_util::BoundingBox;
use crate::map::{LineDef, Sector, SideDef, Vertex};
use parking_lot::RwLock;
use std::sync::Arc;

/// The main document representing a map's contents.
///
/// Every store is behind an `Arc<RwLock<..>>` so an editor or game host can
/// share the document across threads; the node builder itself takes one
/// consistent snapshot of what it needs at the start of a build and never
/// locks again on the hot path.
#[derive(Default)]
pub struct MapDocument {
    // Geometry data.
    pub vertices: Arc<RwLock<Vec<Arc<Vertex>>>>,
    pub sectors: Arc<RwLock<Vec<Arc<Sector>>>>,
    pub sidedefs: Arc<RwLock<Vec<Arc<SideDef>>>>,
    pub linedefs: Arc<RwLock<Vec<Arc<LineDef>>>>,

    pub map_name: String,
}

impl MapDocument {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self {
            vertices: Arc::new(RwLock::new(Vec::new())),
            sectors: Arc::new(RwLock::new(Vec::new())),
            sidedefs: Arc::new(RwLock::new(Vec::new())),
            linedefs: Arc::new(RwLock::new(Vec::new())),
            map_name: String::new(),
        }
    }

    // Thread-safe getters.
    pub fn vertices(&self) -> Arc<RwLock<Vec<Arc<Vertex>>>> {
        Arc::clone(&self.vertices)
    }
    pub fn linedefs(&self) -> Arc<RwLock<Vec<Arc<LineDef>>>> {
        Arc::clone(&self.linedefs)
    }
    pub fn sectors(&self) -> Arc<RwLock<Vec<Arc<Sector>>>> {
        Arc::clone(&self.sectors)
    }
    pub fn sidedefs(&self) -> Arc<RwLock<Vec<Arc<SideDef>>>> {
        Arc::clone(&self.sidedefs)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.read().len()
    }
    pub fn line_count(&self) -> usize {
        self.linedefs.read().len()
    }
    pub fn sector_count(&self) -> usize {
        self.sectors.read().len()
    }

    /// Append a vertex, returning its index.
    pub fn push_vertex(&self, x: f64, y: f64) -> usize {
        let mut vertices = self.vertices.write();
        vertices.push(Arc::new(Vertex::new(x, y)));
        vertices.len() - 1
    }

    /// Append a sector, returning its index.
    pub fn push_sector(&self, sector: Sector) -> usize {
        let mut sectors = self.sectors.write();
        sectors.push(Arc::new(sector));
        sectors.len() - 1
    }

    /// Append a sidedef, returning its index.
    pub fn push_sidedef(&self, sidedef: SideDef) -> usize {
        let mut sidedefs = self.sidedefs.write();
        sidedefs.push(Arc::new(sidedef));
        sidedefs.len() - 1
    }

    /// Append a linedef, returning its index.
    pub fn push_linedef(&self, linedef: LineDef) -> usize {
        let mut linedefs = self.linedefs.write();
        linedefs.push(Arc::new(linedef));
        linedefs.len() - 1
    }

    /// Resolve the sector index a sidedef fronts, if the sidedef reference
    /// is valid.
    pub fn sidedef_sector(&self, sidedef: i32) -> Option<usize> {
        if sidedef < 0 {
            return None;
        }
        self.sidedefs
            .read()
            .get(sidedef as usize)
            .and_then(|sd| (sd.sector >= 0).then(|| sd.sector as usize))
    }

    /// The sector the front (right) side of a line faces, if any.
    pub fn line_front_sector(&self, line: &LineDef) -> Option<usize> {
        self.sidedef_sector(line.right)
    }

    /// The sector the back (left) side of a line faces, if any.
    pub fn line_back_sector(&self, line: &LineDef) -> Option<usize> {
        self.sidedef_sector(line.left)
    }

    /// A line is self-referencing when both sides front the same sector.
    pub fn line_is_self_referencing(&self, line: &LineDef) -> bool {
        match (self.line_front_sector(line), self.line_back_sector(line)) {
            (Some(front), Some(back)) => front == back,
            _ => false,
        }
    }

    /// Axis-aligned bounds of all vertices in the map.
    pub fn bounds(&self) -> BoundingBox {
        let binding = self.vertices();
        let vertices = binding.read();
        let mut bounds = BoundingBox::new_empty();

        for vertex in vertices.iter() {
            bounds.expand_point(vertex.x, vertex.y);
        }

        bounds
    }

    /// Visit every line whose bounding box touches `region`, in index
    /// order. The callback returns `false` to stop the iteration early.
    pub fn lines_box_iterator<F>(&self, region: &BoundingBox, mut callback: F)
    where
        F: FnMut(usize, &LineDef) -> bool,
    {
        let vertices = self.vertices.read();
        let linedefs = self.linedefs.read();

        for (index, line) in linedefs.iter().enumerate() {
            let (Some(from), Some(to)) = (vertices.get(line.start), vertices.get(line.end))
            else {
                continue;
            };

            let mut aabb = BoundingBox::new_empty();
            aabb.expand_point(from.x, from.y);
            aabb.expand_point(to.x, to.y);

            if aabb.intersects(region) && !callback(index, line) {
                return;
            }
        }
    }

    /// Count the one-sided and two-sided line owners of a vertex. Used to
    /// locate candidate one-way window lines before building.
    pub fn count_line_owners(&self, vertex: usize) -> (usize, usize) {
        let linedefs = self.linedefs.read();
        let mut one_sided = 0;
        let mut two_sided = 0;

        for line in linedefs.iter() {
            if line.start != vertex && line.end != vertex {
                continue;
            }
            if line.is_two_sided() {
                two_sided += 1;
            } else {
                one_sided += 1;
            }
        }

        (one_sided, two_sided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_line_doc() -> MapDocument {
        let doc = MapDocument::new();
        doc.push_vertex(0.0, 0.0);
        doc.push_vertex(64.0, 0.0);
        doc.push_vertex(64.0, 64.0);
        doc.push_sector(Sector::with_defaults());
        doc.push_sidedef(SideDef::with_sector(0));
        doc.push_linedef(LineDef::new(0, 1, 0, 0, -1));
        doc.push_linedef(LineDef::new(1, 2, 0, 0, -1));
        doc
    }

    #[test]
    fn test_bounds_cover_all_vertices() {
        let doc = two_line_doc();
        let bounds = doc.bounds();
        assert_eq!(bounds.min_x, 0.0);
        assert_eq!(bounds.min_y, 0.0);
        assert_eq!(bounds.max_x, 64.0);
        assert_eq!(bounds.max_y, 64.0);
    }

    #[test]
    fn test_count_line_owners() {
        let doc = two_line_doc();
        // Vertex 1 is shared by both one-sided lines.
        assert_eq!(doc.count_line_owners(1), (2, 0));
        assert_eq!(doc.count_line_owners(0), (1, 0));
    }

    #[test]
    fn test_box_iterator_filters_by_region() {
        let doc = two_line_doc();
        let region = BoundingBox::new(32.0, -8.0, 96.0, 8.0);
        let mut seen = Vec::new();
        doc.lines_box_iterator(&region, |index, _line| {
            seen.push(index);
            true
        });
        // Both lines touch the region box (line 1 at its corner).
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn test_self_referencing_line() {
        let doc = two_line_doc();
        doc.push_sidedef(SideDef::with_sector(0));
        let idx = doc.push_linedef(LineDef::new(0, 2, 0, 1, 1));
        let line = doc.linedefs.read()[idx].clone();
        assert!(doc.line_is_self_referencing(&line));
    }
}
