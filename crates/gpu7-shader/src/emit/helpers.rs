//! Helper functions placed in front of `main`, emitted only when the program needs them.

use super::{Dialect, Emitter};
use crate::analyze::DataType;

pub(super) fn emit_helper_functions(e: &mut Emitter<'_>) {
    let analysis = e.analysis();
    if analysis.has_redc_cube {
        emit_redc_cube(e);
    }
    if analysis.has_cube_map_texture {
        emit_redc_cube_reverse(e);
    }
    emit_clamp_fi32(e);
    if e.input.options.strict_mul {
        e.w.line("float mul_nonIEEE(float a, float b){ if( a == 0.0 || b == 0.0 ) return 0.0; return a*b; }");
    }
}

/// Face selection of the `CUBE` reduction. `stm` receives s, t and twice the major axis.
fn emit_redc_cube(e: &mut Emitter<'_>) {
    let vec2 = e.vector(DataType::Float, 2);
    let vec3 = e.vector(DataType::Float, 3);
    let vec4 = e.vector(DataType::Float, 4);
    let header = match e.dialect {
        Dialect::Glsl => format!("void redcCUBE({vec4} src0, {vec4} src1, out {vec3} stm, out int faceId)"),
        Dialect::Msl => format!("void redcCUBE({vec4} src0, {vec4} src1, thread {vec3}& stm, thread int& faceId)"),
    };
    e.w.open(&header);
    e.w.line(&format!("{vec3} inputCoord = normalize({vec3}(src1.y, src1.x, src0.x));"));
    e.w.line("float rx = inputCoord.x;");
    e.w.line("float ry = inputCoord.y;");
    e.w.line("float rz = inputCoord.z;");
    let axes = [
        ("if( abs(rx) > abs(ry) && abs(rx) > abs(rz) )", "rx", "ry,rz", 0),
        ("else if( abs(ry) > abs(rx) && abs(ry) > abs(rz) )", "ry", "rx,rz", 2),
        ("else", "rz", "rx,ry", 4),
    ];
    for (condition, major, st, face) in axes {
        e.w.open(condition);
        e.w.line(&format!("stm.z = {major}*2.0;"));
        e.w.line(&format!("stm.xy = {vec2}({st});"));
        e.w.line(&format!("if( {major} >= 0.0 ) faceId = {face};"));
        e.w.line(&format!("else faceId = {};", face + 1));
        e.w.close("");
    }
    e.w.close("");
}

/// Inverse of `redcCUBE`: turns face relative coordinates back into a direction.
fn emit_redc_cube_reverse(e: &mut Emitter<'_>) {
    let vec2 = e.vector(DataType::Float, 2);
    let vec3 = e.vector(DataType::Float, 3);
    e.w.open(&format!("{vec3} redcCUBEReverse({vec2} st, int faceId)"));
    e.w.line("st.yx = st.xy;");
    e.w.line(&format!("{vec3} v;"));
    e.w.line("float majorAxis = 1.0;");
    let faces = [("yz", 'x'), ("xz", 'y'), ("xy", 'z')];
    for face in 0..6 {
        let (plane, axis) = faces[face / 2];
        let sign = if face % 2 == 0 { "" } else { "-" };
        let condition = match face {
            0 => "if( faceId == 0 )".to_string(),
            5 => "else".to_string(),
            n => format!("else if( faceId == {n} )"),
        };
        e.w.open(&condition);
        e.w.line(&format!("v.{plane} = (st-{vec2}(1.5))*(majorAxis*2.0);"));
        e.w.line(&format!("v.{axis} = {sign}1.0;"));
        e.w.close("");
    }
    e.w.line("return v;");
    e.w.close("");
}

/// Saturates an integer register holding float bits.
fn emit_clamp_fi32(e: &mut Emitter<'_>) {
    let one = e.cast("1.0", DataType::Float, DataType::SignedInt, 1);
    let zero = e.cast("0.0", DataType::Float, DataType::SignedInt, 1);
    let value = e.cast("v", DataType::SignedInt, DataType::Float, 1);
    let clamped = e.cast(&format!("clamp({value}, 0.0, 1.0)"), DataType::Float, DataType::SignedInt, 1);
    e.w.open("int clampFI32(int v)");
    e.w.line(&format!("if( v == 0x7FFFFFFF ) return {one};"));
    e.w.line(&format!("else if( v == 0xFFFFFFFF ) return {zero};"));
    e.w.line(&format!("return {clamped};"));
    e.w.close("");
}

#[cfg(test)]
mod tests {
    use gpu7_isa::asm::{alu_op, cf_alu, cf_op, sel, Alu, Export, ProgramBuilder};
    use gpu7_isa::{RegisterState, ShaderStage};

    use crate::compile::CompileOptions;
    use crate::emit::test_support::Fixture;
    use crate::emit::Dialect;

    fn cube_program() -> ProgramBuilder {
        let slot = |chan: u8, a: u8, b: u8| {
            Alu::op2(alu_op::CUBE)
                .src(0, sel::gpr(0), a)
                .src(1, sel::gpr(0), b)
                .dst(1, chan)
        };
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_alu(cf_op::ALU, 4, 4))
            .cf(1, Export::new(0, 0, 1).done().end().encode())
            .alu(
                4,
                &[
                    slot(0, 2, 1).encode(),
                    slot(1, 2, 0).encode(),
                    slot(2, 0, 2).encode(),
                    slot(3, 1, 2).last().encode(),
                ],
            );
        builder
    }

    #[test]
    fn cube_reduction_pulls_in_its_helper() {
        let fixture = Fixture::simple(&cube_program(), ShaderStage::Pixel);
        let glsl = fixture.glsl().source;
        assert!(glsl.contains("void redcCUBE(vec4 src0, vec4 src1, out vec3 stm, out int faceId) {"));
        assert!(glsl.contains("redcCUBE(vec4(R0f.z,R0f.z,R0f.x,R0f.y),vec4(R0f.y,R0f.x,R0f.z,R0f.z),cubeMapSTM,cubeMapFaceId);"));
        assert!(glsl.contains("R1f.w = intBitsToFloat(cubeMapFaceId);"));
        assert!(!glsl.contains("redcCUBEReverse"));

        let msl = fixture.emit(Dialect::Msl).unwrap().source;
        assert!(msl.contains("thread float3& stm, thread int& faceId"));
    }

    #[test]
    fn strict_mul_helper_only_when_enabled() {
        let mut builder = ProgramBuilder::new();
        builder.cf(0, Export::new(0, 0, 0).done().end().encode());
        let plain = Fixture::simple(&builder, ShaderStage::Pixel).glsl().source;
        assert!(!plain.contains("mul_nonIEEE"));
        assert!(plain.contains("int clampFI32(int v) {"));

        let options = CompileOptions {
            strict_mul: true,
            ..CompileOptions::default()
        };
        let strict = Fixture::build(&builder, ShaderStage::Pixel, RegisterState::default(), options, None, None);
        assert!(strict.glsl().source.contains("float mul_nonIEEE(float a, float b)"));
    }
}
