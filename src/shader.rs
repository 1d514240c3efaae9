//! SPIR-V loading and shader module creation.

use crate::error::{Result, VulkanError};
use ash::vk;
use log::debug;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Reads a SPIR-V binary from disk and validates its framing.
pub fn load_spirv_file(path: &Path) -> Result<Vec<u32>> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    words_from_bytes(&bytes).map_err(|e| {
        VulkanError::ShaderLoadingError(format!("{}: {}", path.display(), e))
    })
}

/// Reinterprets a raw SPIR-V byte stream as the word stream Vulkan expects.
pub fn words_from_bytes(bytes: &[u8]) -> std::result::Result<Vec<u32>, String> {
    if bytes.is_empty() {
        return Err("SPIR-V binary is empty".to_string());
    }
    if bytes.len() % 4 != 0 {
        return Err(format!("SPIR-V binary length {} is not a multiple of 4", bytes.len()));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    const SPIRV_MAGIC: u32 = 0x0723_0203;
    if words[0] != SPIRV_MAGIC {
        return Err(format!("bad SPIR-V magic number {:#010x}", words[0]));
    }
    Ok(words)
}

pub fn create_shader_module(
    device: &ash::Device,
    code: &[u32],
    allocation_callbacks: Option<&vk::AllocationCallbacks>,
) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
    let module = unsafe { device.create_shader_module(&create_info, allocation_callbacks) }
        .map_err(|e| {
            VulkanError::ShaderLoadingError(format!("failed to create shader module: {}", e))
        })?;
    debug!("Shader module created: {:?} ({} words).", module, code.len());
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unaligned_binaries() {
        assert!(words_from_bytes(&[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0u8; 8];
        assert!(words_from_bytes(&bytes).is_err());
    }

    #[test]
    fn accepts_a_minimal_header() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x0723_0203u32.to_le_bytes());
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let words = words_from_bytes(&bytes).unwrap();
        assert_eq!(words[0], 0x0723_0203);
        assert_eq!(words.len(), 2);
    }
}
