//! Property tests over arbitrary microcode and literal bit patterns.

use gpu7_isa::asm::{alu_op, cf_alu, cf_op, sel, Alu, Export, ProgramBuilder};
use gpu7_isa::{RegisterState, ShaderStage};
use gpu7_shader::decode::decode_program;
use gpu7_shader::program::Program;
use gpu7_shader::{compile_shader, CompileOptions, Dialects, Diagnostics, ShaderInput};
use proptest::prelude::*;

/// Pixel shader moving one literal into `R1.x` and exporting `R1`.
fn literal_program(bits: u32) -> Vec<u8> {
    let mut builder = ProgramBuilder::new();
    builder
        .cf(0, cf_alu(cf_op::ALU, 4, 2))
        .cf(1, Export::new(0, 0, 1).done().end().encode())
        .alu(
            4,
            &[
                Alu::op2(alu_op::MOV).src(0, sel::LITERAL, 0).dst(1, 0).last().encode(),
                [bits, 0],
            ],
        );
    builder.to_bytes()
}

/// Parses the float expression the emitter used for a literal back into its bit pattern.
fn literal_bits(expr: &str) -> Option<u32> {
    for prefix in ["intBitsToFloat(0x", "as_type<float>(0x"] {
        if let Some(hex) = expr.strip_prefix(prefix) {
            return u32::from_str_radix(hex.trim_end_matches(')'), 16).ok();
        }
    }
    expr.parse::<f32>().ok().map(f32::to_bits)
}

fn emitted_literal(source: &str, dst: &str) -> String {
    let start = source.find(dst).unwrap() + dst.len();
    let end = source[start..].find(';').unwrap();
    source[start..start + end].to_string()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn float_literals_keep_their_bits(bits in any::<u32>()) {
        let bytes = literal_program(bits);
        let regs = RegisterState::default();
        let input = ShaderInput::new(ShaderStage::Pixel, &bytes, &regs);
        let options = CompileOptions {
            dialects: Dialects::GLSL | Dialects::MSL,
            ..CompileOptions::default()
        };
        let shader = compile_shader(&input, &options).unwrap();
        for source in [shader.glsl.unwrap(), shader.msl.unwrap()] {
            let expr = emitted_literal(&source, "R1f.x = ");
            prop_assert_eq!(literal_bits(&expr), Some(bits), "{}", expr);
        }
    }

    #[test]
    fn decoder_never_panics_on_random_words(words in proptest::collection::vec(any::<u32>(), 0..256)) {
        let bytes: &[u8] = bytemuck::cast_slice(&words);
        let program = Program::new(bytes).unwrap();
        for stage in [ShaderStage::Vertex, ShaderStage::Pixel, ShaderStage::Geometry] {
            let mut diagnostics = Diagnostics::new();
            let _ = decode_program(&program, stage, &mut diagnostics);
        }
    }

    #[test]
    fn misaligned_programs_are_rejected(len in 0usize..64) {
        let bytes = vec![0u8; len];
        prop_assert_eq!(Program::new(&bytes).is_ok(), len % 4 == 0);
    }
}
