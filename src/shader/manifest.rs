//! Serde schema for the JSON reflection sidecar that accompanies a SPIR-V
//! binary.

use serde::Deserialize;
use std::collections::HashMap;

/// One array dimension: either a literal size or the name of a
/// specialization constant that provides it at pipeline-creation time.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ArrayDim {
    /// A compile-time-fixed array length.
    Literal(u32),
    /// The name of a specialization constant supplying the length.
    Named(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryPointManifest {
    pub name: String,
    pub mode: String,
    #[serde(default)]
    pub workgroup_size: Option<[u32; 3]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpecializationConstantManifest {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub default_value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeMemberManifest {
    pub name: String,
    pub offset: u32,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub array: Vec<ArrayDim>,
    #[serde(default)]
    pub array_stride: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TypeManifest {
    #[serde(default)]
    pub members: Vec<TypeMemberManifest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageVariableManifest {
    pub name: String,
    pub location: u32,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DescriptorManifest {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub array: Vec<ArrayDim>,
    #[serde(default)]
    pub input_attachment_index: Option<u32>,
}

/// The full reflection manifest for one shader module.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ShaderManifest {
    #[serde(default)]
    pub entry_points: Vec<EntryPointManifest>,
    #[serde(default)]
    pub specialization_constants: Vec<SpecializationConstantManifest>,
    #[serde(default)]
    pub push_constants: Vec<TypeMemberManifest>,
    #[serde(default)]
    pub types: HashMap<String, TypeManifest>,
    #[serde(default)]
    pub inputs: Vec<StageVariableManifest>,
    #[serde(default)]
    pub outputs: Vec<StageVariableManifest>,
    #[serde(default)]
    pub ubos: Vec<DescriptorManifest>,
    #[serde(default)]
    pub ssbos: Vec<DescriptorManifest>,
    #[serde(default)]
    pub textures: Vec<DescriptorManifest>,
    #[serde(default)]
    pub images: Vec<DescriptorManifest>,
    #[serde(default)]
    pub separate_images: Vec<DescriptorManifest>,
    #[serde(default)]
    pub separate_samplers: Vec<DescriptorManifest>,
    #[serde(default)]
    pub subpass_inputs: Vec<DescriptorManifest>,
    #[serde(default)]
    pub acceleration_structures: Vec<DescriptorManifest>,
}

impl ShaderManifest {
    /// Parses a manifest from its JSON text.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Byte size of a scalar/vector/matrix type name, or `None` if `ty` names a
/// struct (look it up in `types` instead).
pub fn scalar_type_size(ty: &str) -> Option<u32> {
    Some(match ty {
        "bool" | "int" | "uint" | "float" => 4,
        "double" => 8,
        "vec2" | "ivec2" | "uvec2" => 8,
        "vec3" | "ivec3" | "uvec3" => 12,
        "vec4" | "ivec4" | "uvec4" => 16,
        "mat2" => 16,
        "mat3" => 36,
        "mat4" => 64,
        _ => return None,
    })
}

/// Resolves the byte size of `ty`, following struct member layout in
/// `types` when `ty` is not a builtin scalar/vector/matrix name. Returns
/// the max of `(member offset + member size)` across all members for
/// struct types.
pub fn type_size(ty: &str, types: &HashMap<String, TypeManifest>) -> Option<u32> {
    if let Some(size) = scalar_type_size(ty) {
        return Some(size);
    }
    let def = types.get(ty)?;
    def.members
        .iter()
        .map(|m| m.offset + type_size(&m.ty, types).unwrap_or(0))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_manifest() {
        let json = r#"{
            "entry_points": [{"name":"main","mode":"fragment"}],
            "ubos": [{"name":"Camera","set":0,"binding":0,"type":"CameraData"}],
            "types": {"CameraData": {"members":[{"name":"viewProj","offset":0,"type":"mat4"}]}}
        }"#;
        let manifest = ShaderManifest::parse(json).unwrap();
        assert_eq!(manifest.entry_points.len(), 1);
        assert_eq!(manifest.ubos[0].binding, 0);
        assert_eq!(type_size("CameraData", &manifest.types), Some(64));
    }

    #[test]
    fn scalar_sizes_match_std140_minimums() {
        assert_eq!(scalar_type_size("float"), Some(4));
        assert_eq!(scalar_type_size("vec4"), Some(16));
        assert_eq!(scalar_type_size("mat4"), Some(64));
        assert_eq!(scalar_type_size("unknown_type"), None);
    }
}
