// SPDX-License-Identifier: GPL-3.0-only

//! WGSL validation for the wgpu backend shader

const QUAD_SHADER: &str = include_str!("../src/gpu/quad.wgsl");

/// Validate that a WGSL shader compiles successfully using naga
fn validate_shader(name: &str, source: &str) -> naga::Module {
    let module = match naga::front::wgsl::parse_str(source) {
        Ok(module) => module,
        Err(e) => panic!("Shader '{}' parse failed: {:?}", name, e),
    };
    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module);
    if let Err(e) = info {
        panic!("Shader '{}' validation failed: {:?}", name, e);
    }
    module
}

#[test]
fn test_quad_shader_validates() {
    validate_shader("quad", QUAD_SHADER);
}

#[test]
fn test_quad_shader_has_both_stages() {
    let module = validate_shader("quad", QUAD_SHADER);
    let stages: Vec<naga::ShaderStage> = module.entry_points.iter().map(|e| e.stage).collect();
    assert!(stages.contains(&naga::ShaderStage::Vertex));
    assert!(stages.contains(&naga::ShaderStage::Fragment));
}
