use gpu7_isa::asm::{alu_op, cf_alu, cf_call, cf_inst, cf_op, sel, vfetch, Alu, Export, ProgramBuilder, Sample};
use gpu7_isa::{AluCfKind, AluSrc, ExportType, Op2, ShaderStage, TexOpcode};

use super::*;
use crate::error::DiagnosticKind;

fn decode(builder: &ProgramBuilder) -> (DecodedProgram, Diagnostics) {
    let bytes = builder.to_bytes();
    let program = Program::new(&bytes).unwrap();
    let mut diagnostics = Diagnostics::new();
    let decoded = decode_program(&program, ShaderStage::Vertex, &mut diagnostics).unwrap();
    (decoded, diagnostics)
}

#[test]
fn alu_units_literals_and_groups() {
    let mut builder = ProgramBuilder::new();
    builder
        .cf(0, cf_alu(cf_op::ALU, 4, 5))
        .cf(1, Export::new(1, 60, 0).done().end().encode())
        .alu(
            4,
            &[
                // Group 0: two writes to .x, the second lands on the trans unit.
                Alu::op2(alu_op::MOV).src(0, sel::LITERAL, 0).dst(1, 0).encode(),
                Alu::op2(alu_op::MOV).src(0, sel::LITERAL, 3).dst(2, 0).last().encode(),
                [0x3F80_0000, 0x4000_0000],
                [0x4040_0000, 0x4080_0000],
                // Group 1
                Alu::op2(alu_op::ADD)
                    .src(0, sel::PV, 0)
                    .src(1, sel::PS, 0)
                    .dst(3, 2)
                    .last()
                    .encode(),
            ],
        );
    let (decoded, diagnostics) = decode(&builder);
    assert!(diagnostics.is_empty());
    assert_eq!(decoded.cf.len(), 2);

    let CfKind::Alu { kind, clause } = &decoded.cf[0].kind else {
        panic!("expected ALU clause");
    };
    assert_eq!(*kind, AluCfKind::Alu);
    assert_eq!(clause.instructions.len(), 3);
    let units: Vec<u8> = clause.instructions.iter().map(|i| i.unit).collect();
    assert_eq!(units, vec![0, UNIT_TRANS, 2]);
    assert_eq!(
        clause.instructions[0].literal,
        [0x3F80_0000, 0x4000_0000, 0x4040_0000, 0x4080_0000]
    );
    assert_eq!(clause.instructions[2].group_index, 1);
    assert_eq!(clause.instructions[2].literal, [0; 4]);
    assert_eq!(clause.instructions[2].src[0].sel, AluSrc::PreviousVector);
    assert_eq!(clause.groups().count(), 2);

    let CfKind::Export(export) = decoded.cf[1].kind else {
        panic!("expected export");
    };
    assert_eq!(export.export_type, ExportType::Position);
    assert_eq!(export.array_base, 60);
    assert!(export.done);
}

#[test]
fn trans_only_ops_use_the_scalar_unit() {
    let mut builder = ProgramBuilder::new();
    builder
        .cf(0, cf_alu(cf_op::ALU, 2, 1))
        .cf(1, cf_inst(cf_op::NOP, 0, 1, true))
        .alu(2, &[Alu::op2(alu_op::RECIP_FF).dst(0, 1).last().encode()]);
    let (decoded, _) = decode(&builder);
    let CfKind::Alu { clause, .. } = &decoded.cf[0].kind else {
        panic!("expected ALU clause");
    };
    assert_eq!(clause.instructions[0].op, AluOp::Op2(Op2::RecipFf));
    assert_eq!(clause.instructions[0].unit, UNIT_TRANS);
}

#[test]
fn tex_and_vtx_clauses_decode_fetches() {
    let mut builder = ProgramBuilder::new();
    builder
        .cf(0, cf_inst(cf_op::TEX, 4, 1, false))
        .cf(1, cf_inst(cf_op::VTX, 6, 1, true))
        .tex(4, &[Sample::new(0x10, 3, 1, 2).encode()])
        .tex(6, &[vfetch(0x80, 0, 4, [0, 1, 2, 3], 16, 0x23, 2, false)]);
    let (decoded, diagnostics) = decode(&builder);
    assert!(diagnostics.is_empty());

    let CfKind::Tex { instructions } = &decoded.cf[0].kind else {
        panic!("expected TEX clause");
    };
    assert_eq!(instructions[0].opcode, TexOpcode::Sample);
    assert_eq!(instructions[0].dst_gpr, Some(2));
    let TexPayload::Fetch(fetch) = instructions[0].payload else {
        panic!("expected texture fetch");
    };
    assert_eq!(fetch.texture, 3);
    assert_eq!(fetch.unnormalized, [false; 4]);

    let CfKind::Tex { instructions } = &decoded.cf[1].kind else {
        panic!("expected VTX clause");
    };
    let TexPayload::VertexFetch(vtx) = instructions[0].payload else {
        panic!("expected vertex fetch");
    };
    assert_eq!(vtx.buffer, 0x80);
    assert_eq!(vtx.offset, 16);
    assert_eq!(vtx.format, 0x23);
}

#[test]
fn unknown_cf_opcode_is_reported_and_skipped() {
    let mut builder = ProgramBuilder::new();
    builder
        .cf(0, cf_inst(0x3F, 0, 1, false))
        .cf(1, Export::new(0, 0, 0).done().end().encode());
    let (decoded, diagnostics) = decode(&builder);
    assert_eq!(decoded.cf.len(), 1);
    let kinds: Vec<DiagnosticKind> = diagnostics.iter().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![DiagnosticKind::UnsupportedInstruction]);
}

#[test]
fn calls_collect_subroutines_until_return() {
    let mut builder = ProgramBuilder::new();
    builder
        .cf(0, cf_call(3))
        .cf(1, cf_call(3))
        .cf(2, Export::new(0, 0, 0).done().end().encode())
        .cf(3, cf_inst(cf_op::POP, 0, 1, false))
        .cf(4, cf_inst(cf_op::RETURN, 0, 1, false));
    let (decoded, diagnostics) = decode(&builder);
    assert!(diagnostics.is_empty());
    assert_eq!(decoded.subroutines.len(), 1);
    let sub = decoded.subroutine(3).unwrap();
    assert_eq!(sub.cf.len(), 2);
    assert_eq!(sub.cf[1].kind, CfKind::Return);
}

#[test]
fn subroutine_without_return_is_an_assumption_violation() {
    let mut builder = ProgramBuilder::new();
    builder
        .cf(0, cf_call(2))
        .cf(1, Export::new(0, 0, 0).done().end().encode())
        .cf(2, cf_inst(cf_op::POP, 0, 1, true));
    let (_, diagnostics) = decode(&builder);
    let kinds: Vec<DiagnosticKind> = diagnostics.iter().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![DiagnosticKind::AssumptionViolation]);
}

#[test]
fn truncated_clause_is_a_structural_error() {
    let mut builder = ProgramBuilder::new();
    builder
        .cf(0, cf_alu(cf_op::ALU, 1, 8))
        .cf(1, cf_inst(cf_op::NOP, 0, 1, true));
    let bytes = builder.to_bytes();
    let program = Program::new(&bytes).unwrap();
    let err = decode_program(&program, ShaderStage::Pixel, &mut Diagnostics::new()).unwrap_err();
    assert!(matches!(err, CompileError::StructuralDecode { .. }));
}

#[test]
fn buffer_exhaustion_ends_the_main_program() {
    let mut builder = ProgramBuilder::new();
    builder.cf(0, Export::new(0, 0, 0).done().encode());
    let (decoded, diagnostics) = decode(&builder);
    assert_eq!(decoded.cf.len(), 1);
    assert!(diagnostics.is_empty());
}
