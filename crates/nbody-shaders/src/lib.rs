//! Shaders for the async compute N-body sample.
//!
//! GLSL sources live in `shaders/` and are compiled to SPIR-V at build time
//! using shaderc.
//!
//! Descriptor layouts:
//! - compute passes: 0 = timing region, 1 = simulation buffer, 2 = slot draw buffer
//! - particle draw: 0 = slot draw buffer, 1 = view uniform

use std::sync::OnceLock;

/// Embedded SPIR-V shader bytecode (raw bytes, may not be aligned).
mod spirv_bytes {
    pub static VELOCITY_UPDATE_COMP: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/particle_velocity_update.spv"));
    pub static POSITION_UPDATE_COMP: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/particle_update.spv"));
    pub static PARTICLE_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/particle_vert.spv"));
    pub static PARTICLE_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/particle_frag.spv"));
}

/// Convert byte slice to aligned u32 Vec (SPIR-V requires 4-byte alignment).
fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
    assert!(
        bytes.len() % 4 == 0,
        "SPIR-V bytecode must be a whole number of words"
    );
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

static VELOCITY_UPDATE_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static POSITION_UPDATE_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static PARTICLE_VERT_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static PARTICLE_FRAG_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();

/// Velocity pass: gravity accumulation over the simulation buffer.
pub fn velocity_update_shader() -> &'static [u32] {
    VELOCITY_UPDATE_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::VELOCITY_UPDATE_COMP))
}

/// Position pass: integrates positions and fills a slot's draw buffer.
pub fn position_update_shader() -> &'static [u32] {
    POSITION_UPDATE_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::POSITION_UPDATE_COMP))
}

/// Point-sprite vertex shader reading a slot's draw buffer.
pub fn particle_vertex_shader() -> &'static [u32] {
    PARTICLE_VERT_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::PARTICLE_VERT))
}

pub fn particle_fragment_shader() -> &'static [u32] {
    PARTICLE_FRAG_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::PARTICLE_FRAG))
}
