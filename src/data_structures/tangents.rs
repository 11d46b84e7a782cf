//! Per-vertex tangent frames for normal mapping, and model bounds.
//!
//! glTF assets often ship normal maps without TANGENT attributes, so the
//! texture-space basis is derived from positions and UVs: for every
//! triangle the position edges are expressed in the UV edge basis, and the
//! resulting tangent and bitangent are summed into each of its vertices.
//! The sums are not normalised here; the shader normalises them.

use cgmath::{Matrix2, SquareMatrix, Vector3, Zero};

use crate::{
    data_structures::{
        accessor::{Scalar, ScalarAccessor, Vec2, Vec2Accessor, Vec3, Vec3Accessor},
        document::{Document, Primitive, Topology},
    },
    error::{Result, ViewerError},
};

/// Axis-aligned bounding box, empty until the first point is included.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::empty()
    }
}

impl Bounds {
    pub fn empty() -> Self {
        Self {
            min: Vector3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Vector3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn include(&mut self, point: Vector3<f32>) {
        self.min = Vector3::new(
            self.min.x.min(point.x),
            self.min.y.min(point.y),
            self.min.z.min(point.z),
        );
        self.max = Vector3::new(
            self.max.x.max(point.x),
            self.max.y.max(point.y),
            self.max.z.max(point.z),
        );
    }

    /// Midpoint of the box, `None` while empty.
    pub fn center(&self) -> Option<Vector3<f32>> {
        if self.is_empty() {
            return None;
        }
        Some((self.min + self.max) * 0.5)
    }
}

/// Accumulated tangent frames of one primitive, one entry per vertex.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TangentFrames {
    pub tangents: Vec<[f32; 3]>,
    pub bitangents: Vec<[f32; 3]>,
    /// Triangles skipped because their UVs do not span a plane.
    pub degenerate_triangles: usize,
}

/// Index triples of the triangles `count` indices form under `topology`.
///
/// The triples address positions in the index list, not vertices.
pub fn triangle_corners(topology: Topology, count: usize) -> Vec<[usize; 3]> {
    match topology {
        Topology::Triangles => (0..count / 3).map(|t| [3 * t, 3 * t + 1, 3 * t + 2]).collect(),
        Topology::TriangleStrip => (0..count.saturating_sub(2))
            .map(|t| match t % 2 {
                0 => [t, t + 1, t + 2],
                _ => [t + 1, t, t + 2],
            })
            .collect(),
        Topology::TriangleFan => (1..count.saturating_sub(1))
            .map(|t| [0, t, t + 1])
            .collect(),
        Topology::Points | Topology::Lines | Topology::LineLoop | Topology::LineStrip => Vec::new(),
    }
}

/// Derives tangent frames for every vertex referenced by `indices`.
///
/// Vertices the triangles never touch keep a zero frame. Every visited
/// vertex position is folded into `bounds`.
pub fn derive_tangents<P, T>(
    indices: &[u32],
    topology: Topology,
    positions: &Vec3Accessor<P>,
    tex_coords: &Vec2Accessor<T>,
    bounds: &mut Bounds,
) -> Result<TangentFrames>
where
    P: AsRef<[u8]>,
    T: AsRef<[u8]>,
{
    let vertex_count = positions.count();
    let mut tangents = vec![Vector3::<f32>::zero(); vertex_count];
    let mut bitangents = vec![Vector3::<f32>::zero(); vertex_count];
    let mut degenerate_triangles = 0;

    for corners in triangle_corners(topology, indices.len()) {
        let [a, b, c] = corners.map(|corner| indices[corner] as usize);
        let (pa, pb, pc) = (positions.get(a)?, positions.get(b)?, positions.get(c)?);
        let (ta, tb, tc) = (tex_coords.get(a)?, tex_coords.get(b)?, tex_coords.get(c)?);
        bounds.include(pa);
        bounds.include(pb);
        bounds.include(pc);

        // Columns are the two UV edges; its inverse maps UV directions onto
        // combinations of the position edges.
        let uv_edges = Matrix2::from_cols(tb - ta, tc - ta);
        let Some(inverse) = uv_edges.invert().filter(|m| {
            m.x.x.is_finite() && m.x.y.is_finite() && m.y.x.is_finite() && m.y.y.is_finite()
        }) else {
            degenerate_triangles += 1;
            continue;
        };
        let (edge_b, edge_c) = (pb - pa, pc - pa);
        let tangent = edge_b * inverse.x.x + edge_c * inverse.x.y;
        let bitangent = edge_b * inverse.y.x + edge_c * inverse.y.y;

        for vertex in [a, b, c] {
            tangents[vertex] += tangent;
            bitangents[vertex] += bitangent;
        }
    }

    Ok(TangentFrames {
        tangents: tangents.into_iter().map(Into::into).collect(),
        bitangents: bitangents.into_iter().map(Into::into).collect(),
        degenerate_triangles,
    })
}

/// Reads the index list of a primitive, or the implicit `0..vertex_count`
/// sequence when it has none.
pub fn primitive_indices(
    document: &Document,
    primitive: &Primitive,
    vertex_count: usize,
) -> Result<Vec<u32>> {
    match primitive.indices {
        Some(accessor) => {
            let indices: ScalarAccessor<&[u8]> = document.typed_accessor::<Scalar>(accessor)?;
            indices
                .iter()
                .map(|index| {
                    let index = index as usize;
                    if index >= vertex_count {
                        return Err(ViewerError::IndexOutOfRange {
                            index,
                            count: vertex_count,
                        });
                    }
                    Ok(index as u32)
                })
                .collect()
        }
        None => Ok((0..vertex_count as u32).collect()),
    }
}

/// Tangent frames of a document primitive, resolving its accessors.
///
/// Returns `Ok(None)` when the primitive has no position or UV data to
/// derive a basis from.
pub fn derive_primitive_tangents(
    document: &Document,
    primitive: &Primitive,
    bounds: &mut Bounds,
) -> Result<Option<TangentFrames>> {
    let (Some(position), Some(tex_coord)) =
        (primitive.attributes.position, primitive.attributes.tex_coord)
    else {
        return Ok(None);
    };
    let positions = document.typed_accessor::<Vec3>(position)?;
    let tex_coords = document.typed_accessor::<Vec2>(tex_coord)?;
    let indices = primitive_indices(document, primitive, positions.count())?;
    derive_tangents(&indices, primitive.mode, &positions, &tex_coords, bounds).map(Some)
}

/// Folds the positions of a primitive's triangles into `bounds`.
pub fn include_primitive_bounds(
    document: &Document,
    primitive: &Primitive,
    bounds: &mut Bounds,
) -> Result<()> {
    let Some(position) = primitive.attributes.position else {
        return Ok(());
    };
    let positions = document.typed_accessor::<Vec3>(position)?;
    let indices = primitive_indices(document, primitive, positions.count())?;
    for corners in triangle_corners(primitive.mode, indices.len()) {
        for corner in corners {
            bounds.include(positions.get(indices[corner] as usize)?);
        }
    }
    Ok(())
}
