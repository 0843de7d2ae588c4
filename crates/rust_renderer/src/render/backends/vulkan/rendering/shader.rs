//! SPIR-V loading and shader modules

use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::render::backends::vulkan::resources::resource::{DeviceObject, Owned, ShaderModule};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

/// Entry point used by every shader stage
pub const ENTRY_POINT: &std::ffi::CStr = c"main";

/// Decode SPIR-V words from raw bytes
pub fn parse_spirv(bytes: &[u8]) -> RenderResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| RenderError::asset(format!("invalid SPIR-V: {e}"), None))
}

/// Read a SPIR-V file; a missing or malformed file is an asset error
pub fn read_spirv(path: impl AsRef<Path>) -> RenderResult<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| {
        RenderError::asset(format!("failed to read shader: {e}"), Some(path))
    })?;
    ash::util::read_spv(&mut Cursor::new(&bytes))
        .map_err(|e| RenderError::asset(format!("invalid SPIR-V: {e}"), Some(path)))
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> RenderResult<Owned<ShaderModule>> {
    let info = vk::ShaderModuleCreateInfo::builder().code(code);
    let module = unsafe { device.create_shader_module(&info, None) }.check("vkCreateShaderModule")?;
    Ok(DeviceObject::owned(device, module))
}

/// Load a shader module from a SPIR-V file
pub fn load_shader_module(
    device: &ash::Device,
    path: impl AsRef<Path>,
) -> RenderResult<Owned<ShaderModule>> {
    let path = path.as_ref();
    let code = read_spirv(path)?;
    log::debug!("Loaded shader {} ({} words)", path.display(), code.len());
    create_shader_module(device, &code)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_parse_valid_header() {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words.len(), 5);
    }

    #[test]
    fn test_rejects_truncated_bytes() {
        let bytes = [0x03, 0x02, 0x23];
        assert!(matches!(parse_spirv(&bytes), Err(RenderError::Asset { .. })));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = read_spirv("no/such/shader.spv").unwrap_err();
        match err {
            RenderError::Asset { path, .. } => {
                assert_eq!(path.as_deref(), Some(Path::new("no/such/shader.spv")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
