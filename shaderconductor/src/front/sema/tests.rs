use super::*;
use crate::front::lexer::tokenize;
use crate::front::parser::parse;
use crate::ir::visit::for_each_expr;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn check(source: &str, entry: &str, stage: ShaderStage) -> Result<Checked, Diagnostics> {
    check_with(source, entry, stage, &OptionsDesc::default())
}

fn check_with(
    source: &str,
    entry: &str,
    stage: ShaderStage,
    options: &OptionsDesc,
) -> Result<Checked, Diagnostics> {
    let tokens = tokenize(source, Arc::from("test.hlsl")).unwrap();
    let unit = parse(tokens).unwrap();
    analyze(&unit, &SemaOptions::new(entry, stage, options), "test.hlsl")
}

fn first_error(diags: &Diagnostics) -> (ErrorKind, String) {
    let d = diags.iter().find(|d| d.is_error()).unwrap();
    (d.kind, d.message.clone())
}

#[test]
fn test_pixel_shader_checks() {
    let checked = check(
        "float4 PS(float4 pos : SV_Position) : SV_Target { return pos * 0.5; }",
        "PS",
        ShaderStage::Pixel,
    )
    .unwrap();
    let function = &checked.module.functions[checked.entry];
    assert_eq!(function.name, "PS");
    assert_eq!(function.params.len(), 1);
    assert_eq!(checked.module.globals.len(), 0);
}

#[test]
fn test_undeclared_identifier() {
    let diags = check(
        "float4 PS() : SV_Target { return color; }",
        "PS",
        ShaderStage::Pixel,
    )
    .unwrap_err();
    assert_eq!(
        first_error(&diags),
        (
            ErrorKind::Semantic,
            "use of undeclared identifier 'color'".to_string()
        )
    );
}

#[test]
fn test_missing_entry_point() {
    let diags = check("float4 PS() : SV_Target { return 1; }", "main", ShaderStage::Pixel)
        .unwrap_err();
    assert_eq!(first_error(&diags).1, "missing entry point definition 'main'");
}

#[test]
fn test_loose_uniforms_collect_in_globals_buffer() {
    let checked = check(
        "float4 tint; float scale;\nfloat4 PS() : SV_Target { return tint * scale; }",
        "PS",
        ShaderStage::Pixel,
    )
    .unwrap();
    let globals: Vec<_> = checked.module.globals.iter().map(|(_, g)| g).collect();
    assert_eq!(globals.len(), 1);
    assert_eq!(globals[0].name, "$Globals");
    let GlobalKind::ConstantBuffer { members, .. } = &globals[0].kind else {
        panic!("expected a constant buffer");
    };
    let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["tint", "scale"]);
}

#[test]
fn test_compute_requires_numthreads() {
    let diags = check("void CS() {}", "CS", ShaderStage::Compute).unwrap_err();
    assert_eq!(
        first_error(&diags).1,
        "compute entry point must have a valid numthreads attribute"
    );

    let checked = check("[numthreads(8, 4, 1)] void CS() {}", "CS", ShaderStage::Compute).unwrap();
    assert_eq!(checked.module.functions[checked.entry].numthreads, Some([8, 4, 1]));
}

#[test]
fn test_pixel_outputs_are_restricted() {
    let diags = check(
        "float4 PS() : SV_Position { return 0; }",
        "PS",
        ShaderStage::Pixel,
    )
    .unwrap_err();
    assert!(first_error(&diags).1.contains("is invalid as ps Output"));
}

#[test]
fn test_entry_outputs_need_semantics() {
    let diags = check("float4 PS() { return 0; }", "PS", ShaderStage::Pixel).unwrap_err();
    assert!(first_error(&diags).1.starts_with("Semantic must be defined for all outputs"));
}

#[test]
fn test_16bit_types_require_the_option() {
    let source = "float4 PS() : SV_Target { float16_t x = 1; return x; }";
    let diags = check(source, "PS", ShaderStage::Pixel).unwrap_err();
    assert_eq!(first_error(&diags).0, ErrorKind::UnsupportedFeature);

    let options = OptionsDesc {
        enable_16bit_types: true,
        ..OptionsDesc::default()
    };
    assert!(check_with(source, "PS", ShaderStage::Pixel, &options).is_ok());
}

#[test]
fn test_break_outside_loop() {
    let diags = check(
        "float4 PS() : SV_Target { break; return 0; }",
        "PS",
        ShaderStage::Pixel,
    )
    .unwrap_err();
    assert_eq!(
        first_error(&diags).1,
        "'break' statement not in loop or switch statement"
    );
}

#[test]
fn test_redefinition() {
    let diags = check(
        "float4 PS() : SV_Target { float a = 1; float a = 2; return a; }",
        "PS",
        ShaderStage::Pixel,
    )
    .unwrap_err();
    assert_eq!(first_error(&diags).1, "redefinition of 'a'");
}

#[test]
fn test_mul_lowers_to_matrix_product() {
    let checked = check(
        "float4x4 wvp;\nfloat4 VS(float4 pos : POSITION) : SV_Position { return mul(pos, wvp); }",
        "VS",
        ShaderStage::Vertex,
    )
    .unwrap();
    let mut products = 0;
    for_each_expr(&checked.module.functions[checked.entry].body, &mut |e| {
        if matches!(e.kind, ExprKind::MatMul { .. }) {
            products += 1;
            assert_eq!(e.ty, Type::Vector(Scalar::F32, 4));
        }
    });
    assert_eq!(products, 1);
}

#[test]
fn test_for_loop_becomes_structured_loop() {
    let checked = check(
        "float4 PS() : SV_Target { float s = 0; for (int i = 0; i < 4; ++i) { s += 1; } return s; }",
        "PS",
        ShaderStage::Pixel,
    )
    .unwrap();
    let body = &checked.module.functions[checked.entry].body;
    let Some(Statement::Loop {
        body: loop_body,
        continuing,
        break_if,
    }) = body.iter().find(|s| matches!(s, Statement::Loop { .. }))
    else {
        panic!("expected a loop");
    };
    assert!(matches!(loop_body[0], Statement::If { .. }));
    assert_eq!(continuing.len(), 1);
    assert!(break_if.is_none());
}

#[test]
fn test_duplicate_case_value() {
    let diags = check(
        "float4 PS() : SV_Target { int k = 1; switch (k) { case 1: break; case 1: break; } return 0; }",
        "PS",
        ShaderStage::Pixel,
    )
    .unwrap_err();
    assert_eq!(first_error(&diags).1, "duplicate case value '1'");
}

#[test]
fn test_sample_needs_matching_sampler() {
    let source = "Texture2D tex; SamplerComparisonState cmp;\n\
                  float4 PS(float2 uv : TEXCOORD0) : SV_Target { return tex.Sample(cmp, uv); }";
    let diags = check(source, "PS", ShaderStage::Pixel).unwrap_err();
    assert_eq!(first_error(&diags).1, "'Sample' requires a SamplerState");
}

#[test]
fn test_global_declarators_and_unsized_arrays() {
    let source = "static const float weights[] = { 0.25, 0.5, 0.25 };\n\
                  static float bias = 0.5, gain = 2;\n\
                  float4 PS() : SV_Target { return weights[1] * gain + bias; }";
    let checked = check(source, "PS", ShaderStage::Pixel).unwrap();
    let globals: Vec<_> = checked
        .module
        .globals
        .iter()
        .map(|(_, g)| (g.name.as_str(), g.ty.clone()))
        .collect();
    assert_eq!(
        globals,
        [
            ("weights", Type::Array(Box::new(Type::Scalar(Scalar::F32)), 3)),
            ("bias", Type::Scalar(Scalar::F32)),
            ("gain", Type::Scalar(Scalar::F32)),
        ]
    );
}

#[test]
fn test_geometry_entry_keeps_only_its_name() {
    let source = "struct V { float4 pos : SV_Position; };\n\
                  [maxvertexcount(1)]\n\
                  void GS(point V input[1], inout PointStream<V> stream) { stream.Append(input[0]); }";
    let checked = check(source, "GS", ShaderStage::Geometry).unwrap();
    let function = &checked.module.functions[checked.entry];
    assert_eq!(function.name, "GS");
    assert!(function.params.is_empty());
    assert_eq!(checked.stage, ShaderStage::Geometry);
}

#[test]
fn test_string_literal_outside_attribute() {
    let diags = check(
        "float4 PS() : SV_Target { float x = \"one\"; return x; }",
        "PS",
        ShaderStage::Pixel,
    )
    .unwrap_err();
    assert_eq!(first_error(&diags).1, "string literals are only allowed in attributes");
}

#[test]
fn test_tessellation_entries_need_a_domain() {
    let source = "struct P { float3 pos : POSITION; };\n\
                  [domain(\"pentagon\")]\n\
                  float4 DS(float3 bary : SV_DomainLocation, const OutputPatch<P, 3> patch) : SV_Position\n\
                  { return float4(patch[0].pos * bary.x, 1); }";
    let diags = check(source, "DS", ShaderStage::Domain).unwrap_err();
    assert_eq!(first_error(&diags).1, "domain entry point must have a valid domain attribute");

    let fixed = source.replace("pentagon", "tri");
    assert!(check(&fixed, "DS", ShaderStage::Domain).is_ok());
}
