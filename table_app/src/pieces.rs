//! Procedural playing pieces
//!
//! The demo ships without mesh files, so every piece is assembled from boxes here and handed
//! to the engine through its model and bounding providers.

use wargame_engine::assets::{AssetError, BoundingProvider, ModelData, ModelProvider};
use wargame_engine::foundation::math::{Vec2, Vec3};
use wargame_engine::render::mesh::{Material, MaterialManager, MeshPart};

/// Model path of a tank
pub const TANK: &str = "tank";
/// Model path of a tree
pub const TREE: &str = "tree";
/// Model path of a house
pub const HOUSE: &str = "house";

/// One named box of a piece
struct Block {
    name: &'static str,
    material: &'static str,
    min: Vec3,
    max: Vec3,
}

fn block(name: &'static str, material: &'static str, min: [f32; 3], max: [f32; 3]) -> Block {
    Block { name, material, min: Vec3::new(min[0], min[1], min[2]), max: Vec3::new(max[0], max[1], max[2]) }
}

fn blocks(path: &str) -> Option<Vec<Block>> {
    match path {
        TANK => Some(vec![
            block("hull", "olive", [-1.2, -0.7, 0.0], [1.2, 0.7, 0.6]),
            block("turret", "olive", [-0.5, -0.45, 0.6], [0.5, 0.45, 1.0]),
            block("gun", "steel", [0.5, -0.08, 0.72], [1.9, 0.08, 0.88]),
        ]),
        TREE => Some(vec![
            block("trunk", "bark", [-0.15, -0.15, 0.0], [0.15, 0.15, 1.2]),
            block("crown", "leaves", [-0.8, -0.8, 1.2], [0.8, 0.8, 2.8]),
        ]),
        HOUSE => Some(vec![
            block("walls", "plaster", [-2.0, -1.5, 0.0], [2.0, 1.5, 2.0]),
            block("roof", "tiles", [-2.2, -1.7, 2.0], [2.2, 1.7, 2.6]),
        ]),
        _ => None,
    }
}

fn materials() -> MaterialManager {
    let mut materials = MaterialManager::new();
    for (name, diffuse) in [
        ("olive", [0.33, 0.42, 0.18, 1.0]),
        ("steel", [0.45, 0.45, 0.5, 1.0]),
        ("bark", [0.4, 0.26, 0.13, 1.0]),
        ("leaves", [0.13, 0.45, 0.15, 1.0]),
        ("plaster", [0.85, 0.8, 0.7, 1.0]),
        ("tiles", [0.6, 0.2, 0.15, 1.0]),
    ] {
        let ambient = [diffuse[0] * 0.3, diffuse[1] * 0.3, diffuse[2] * 0.3, 1.0];
        materials.add(name, Material { ambient, diffuse, ..Material::default() });
    }
    materials
}

/// Append the six faces of an axis-aligned box, two triangles each
fn push_box(data: &mut ModelData, min: Vec3, max: Vec3) {
    let corners = |signs: [[bool; 3]; 4]| signs.map(|[x, y, z]| {
        Vec3::new(if x { max.x } else { min.x }, if y { max.y } else { min.y }, if z { max.z } else { min.z })
    });
    let faces = [
        (Vec3::x(), corners([[true, false, false], [true, true, false], [true, true, true], [true, false, true]])),
        (-Vec3::x(), corners([[false, true, false], [false, false, false], [false, false, true], [false, true, true]])),
        (Vec3::y(), corners([[true, true, false], [false, true, false], [false, true, true], [true, true, true]])),
        (-Vec3::y(), corners([[false, false, false], [true, false, false], [true, false, true], [false, false, true]])),
        (Vec3::z(), corners([[false, false, true], [true, false, true], [true, true, true], [false, true, true]])),
        (-Vec3::z(), corners([[false, true, false], [true, true, false], [true, false, false], [false, false, false]])),
    ];
    for (normal, quad) in faces {
        let first = data.vertices.len() as u32;
        data.vertices.extend_from_slice(&quad);
        data.normals.extend_from_slice(&[normal; 4]);
        data.tex_coords.extend_from_slice(&[Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)]);
        data.indexes.extend_from_slice(&[first, first + 1, first + 2, first, first + 2, first + 3]);
    }
}

/// Builds the demo pieces on request
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxPieces;

impl ModelProvider for BoxPieces {
    fn load(&self, path: &str) -> Result<ModelData, AssetError> {
        let blocks = blocks(path).ok_or_else(|| AssetError::NotFound(path.to_string()))?;
        let mut data = ModelData { materials: materials(), ..ModelData::default() };
        for block in blocks {
            data.parts.push(MeshPart::new(data.indexes.len(), block.material, block.name));
            push_box(&mut data, block.min, block.max);
        }
        log::debug!("Built piece '{path}' with {} triangles", data.indexes.len() / 3);
        Ok(data)
    }
}

impl BoundingProvider for BoxPieces {
    fn bounding(&self, path: &str) -> Option<(Vec3, Vec3)> {
        blocks(path)?.iter().fold(None, |bounds, block| match bounds {
            None => Some((block.min, block.max)),
            Some((min, max)) => Some((min.inf(&block.min), max.sup(&block.max))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tank_parts_cover_all_indexes() {
        let data = BoxPieces.load(TANK).unwrap();
        assert_eq!(data.parts.len(), 3);
        assert_eq!(data.indexes.len(), 3 * 36);
        assert_eq!(data.parts[1].begin, 36);
        assert!(data.materials.get("olive").is_some());
    }

    #[test]
    fn test_unknown_piece_is_not_found() {
        assert!(matches!(BoxPieces.load("dragon"), Err(AssetError::NotFound(_))));
        assert!(BoxPieces.bounding("dragon").is_none());
    }

    #[test]
    fn test_bounds_enclose_every_block() {
        let (min, max) = BoxPieces.bounding(TREE).unwrap();
        assert_eq!(min, Vec3::new(-0.8, -0.8, 0.0));
        assert_eq!(max, Vec3::new(0.8, 0.8, 2.8));
    }
}
