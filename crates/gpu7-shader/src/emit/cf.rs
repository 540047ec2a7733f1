//! Control flow: clause gating on the active-mask stack, loops, subroutine calls and vertex
//! emission.
//!
//! Every CF instruction carries the stack depth `d` the analyzer assigned. `activeMaskStack[d]`
//! holds the predicate pushed at that level and `activeMaskStackC[d + 1]` the combined mask that
//! gates execution. When nothing in the shader touches the stack, clauses are emitted ungated.

use gpu7_isa::{AluCfKind, NUM_STREAMOUT_BUFFERS};

use super::alu::emit_alu_clause;
use super::export::{emit_export, emit_ring_write, emit_stream_write};
use super::tex::emit_tex_clause;
use super::{Dialect, Emitter};
use crate::decode::{CfInstruction, CfKind};
use crate::error::CompileError;

pub(super) fn emit_cf_list(e: &mut Emitter<'_>, list: &[CfInstruction]) -> Result<(), CompileError> {
    for cf in list {
        emit_cf(e, cf)?;
    }
    Ok(())
}

fn gated(e: &Emitter<'_>) -> bool {
    e.analysis().modifies_pixel_active_state
}

fn open_gate(e: &mut Emitter<'_>, depth: i64) {
    let header = format!("if( {} == true )", e.mask_c(depth));
    e.w.open(&header);
}

/// `activeMaskStackC[target] = activeMaskStack[source] == true && activeMaskStackC[source] == true;`
fn combine(e: &mut Emitter<'_>, target: i64, source: i64) {
    let line = format!(
        "{} = {} == true && {} == true;",
        e.mask_c(target),
        e.mask(source),
        e.mask_c(source)
    );
    e.w.line(&line);
}

/// Inverts the predicate of the current level.
fn flip(e: &mut Emitter<'_>, d: i64) {
    let line = format!("{} = {} == false;", e.mask(d), e.mask(d));
    e.w.line(&line);
    combine(e, d + 1, d);
}

fn emit_cf(e: &mut Emitter<'_>, cf: &CfInstruction) -> Result<(), CompileError> {
    let d = i64::from(cf.active_stack_depth);
    match &cf.kind {
        CfKind::Alu { kind, clause } => {
            let kind = *kind;
            let gate = gated(e);
            if gate {
                if kind == AluCfKind::PushBefore {
                    open_gate(e, d);
                    let line = format!("{} = {};", e.mask(d), e.mask(d - 1));
                    e.w.line(&line);
                    let line = format!("{} = {};", e.mask_c(d + 1), e.mask_c(d));
                    e.w.line(&line);
                } else {
                    open_gate(e, d + 1);
                }
            }
            emit_alu_clause(e, cf, kind, clause);
            if gate {
                e.w.close("");
                if kind == AluCfKind::PushBefore {
                    e.w.open("else");
                    let line = format!("{} = false;", e.mask(d));
                    e.w.line(&line);
                    let line = format!("{} = false;", e.mask_c(d + 1));
                    e.w.line(&line);
                    e.w.close("");
                }
            }
            match kind {
                AluCfKind::PopAfter => combine(e, d, d - 1),
                AluCfKind::Pop2After => combine(e, d - 1, d - 2),
                AluCfKind::ElseAfter => flip(e, d),
                AluCfKind::Alu | AluCfKind::PushBefore | AluCfKind::Break => {}
            }
        }
        CfKind::Tex { instructions } => {
            let gate = gated(e);
            if gate {
                open_gate(e, d + 1);
            }
            emit_tex_clause(e, instructions);
            if gate {
                e.w.close("");
            }
        }
        CfKind::Export(export) => emit_export(e, cf, export),
        CfKind::MemStream { buffer, write } => emit_stream_write(e, *buffer, write),
        CfKind::MemRing(write) => emit_ring_write(e, cf, write)?,
        CfKind::Else { .. } => flip(e, d),
        CfKind::Pop { pop_count } => {
            let p = i64::from(*pop_count);
            combine(e, d + 1 - p, d - p);
        }
        CfKind::LoopStart { .. } => match e.input.options.loop_iteration_cap {
            Some(cap) => {
                let counter = format!("loopCounter{}", cf.cf_addr);
                e.w.line(&format!("int {counter} = 0;"));
                let header = format!("while( {} == true && {counter} < {cap} )", e.mask_c(d + 1));
                e.w.open(&header);
                e.w.line(&format!("{counter}++;"));
            }
            None => {
                let header = format!("while( {} == true )", e.mask_c(d + 1));
                e.w.open(&header);
            }
        },
        CfKind::LoopEnd { .. } => e.w.close(""),
        CfKind::LoopBreak { .. } => {
            let gate = gated(e);
            if gate {
                open_gate(e, d + 1);
            }
            e.w.line("break;");
            if gate {
                e.w.close("");
            }
        }
        CfKind::EmitVertex => emit_vertex(e, d),
        CfKind::Call { addr, .. } => emit_call(e, cf, *addr)?,
        CfKind::Return => {}
    }
    Ok(())
}

fn emit_vertex(e: &mut Emitter<'_>, d: i64) {
    let gate = gated(e);
    if gate {
        open_gate(e, d + 1);
    }
    let analysis = e.analysis();
    if analysis.output_point_size && !analysis.writes_point_size {
        let line = format!("{} = {};", e.syntax.point_size_output(), e.uniform_var("pointSize"));
        e.w.line(&line);
    }
    let advances_stream_out = match e.dialect {
        Dialect::Glsl => {
            e.w.line("EmitVertex();");
            analysis.use_ssbo_for_streamout
        }
        Dialect::Msl => {
            e.w.line("mesh.set_vertex(vertexIndex, out);");
            e.w.line("vertexIndex++;");
            true
        }
    };
    if advances_stream_out {
        for buffer in 0..NUM_STREAMOUT_BUFFERS {
            if analysis.streamout_write_mask & (1 << buffer) == 0 {
                continue;
            }
            let stride = analysis.streamout_buffer_stride[buffer] / 4;
            e.w.line(&format!("sbBase{buffer} += {stride};"));
        }
    }
    if gate {
        e.w.close("");
    }
}

/// Inlines a subroutine body with its own copy of the mask stack.
fn emit_call(e: &mut Emitter<'_>, cf: &CfInstruction, addr: u32) -> Result<(), CompileError> {
    if !e.mask_suffix.is_empty() {
        e.unsupported(Some(cf.word_index()), "nested subroutine call");
        return Ok(());
    }
    let program = e.input.program;
    let Some(sub) = program.subroutine(addr) else {
        return Err(CompileError::unresolved(addr * 8, "CALL target was never decoded"));
    };
    e.set_mask_suffix(format!("Sub{addr:04x}"));
    let lines = [
        format!("{} = true;", e.mask(0)),
        format!("{} = true;", e.mask_c(0)),
        format!("{} = true;", e.mask_c(1)),
    ];
    for line in &lines {
        e.w.line(line);
    }
    let result = emit_cf_list(e, &sub.cf);
    e.set_mask_suffix(String::new());
    result
}

#[cfg(test)]
mod tests {
    use gpu7_isa::asm::{alu_op, cf_alu, cf_call, cf_inst, cf_op, cf_pop, sel, Alu, Export, ProgramBuilder};
    use gpu7_isa::{RegisterState, ShaderStage};

    use crate::compile::CompileOptions;
    use crate::emit::test_support::Fixture;
    use crate::emit::Dialect;

    fn mov(dst: u32) -> [u32; 2] {
        Alu::op2(alu_op::MOV).src(0, sel::CONST_1_F, 0).dst(dst, 0).last().encode()
    }

    fn predicate() -> [u32; 2] {
        Alu::op2(alu_op::PRED_SETGT)
            .src(0, sel::gpr(0), 0)
            .src(1, sel::CONST_0, 0)
            .no_write()
            .update_exec_mask()
            .last()
            .encode()
    }

    fn if_else_program() -> ProgramBuilder {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_alu(cf_op::ALU_PUSH_BEFORE, 8, 1))
            .cf(1, cf_alu(cf_op::ALU_ELSE_AFTER, 9, 1))
            .cf(2, cf_alu(cf_op::ALU_POP_AFTER, 10, 1))
            .cf(3, Export::new(0, 0, 1).done().end().encode())
            .alu(8, &[predicate()])
            .alu(9, &[mov(1)])
            .alu(10, &[mov(2)]);
        builder
    }

    #[test]
    fn push_else_pop_walks_the_mask_stack() {
        let glsl = Fixture::simple(&if_else_program(), ShaderStage::Pixel).glsl().source;
        let expected = [
            "if( activeMaskStackC[1] == true ) {",
            "activeMaskStack[1] = activeMaskStack[0];",
            "activeMaskStackC[2] = activeMaskStackC[1];",
            "activeMaskStack[1] = predResult;",
            "activeMaskStack[1] = false;",
            "activeMaskStackC[2] = false;",
            "if( activeMaskStackC[2] == true ) {",
            "activeMaskStack[1] = activeMaskStack[1] == false;",
            "activeMaskStackC[2] = activeMaskStack[1] == true && activeMaskStackC[1] == true;",
            "activeMaskStackC[1] = activeMaskStack[0] == true && activeMaskStackC[0] == true;",
        ];
        let mut cursor = 0;
        for line in expected {
            let found = glsl[cursor..].find(line).unwrap_or_else(|| panic!("missing `{line}` in\n{glsl}"));
            cursor += found + line.len();
        }
    }

    #[test]
    fn straight_line_code_is_not_gated() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_alu(cf_op::ALU, 4, 1))
            .cf(1, Export::new(0, 0, 1).done().end().encode())
            .alu(4, &[mov(1)]);
        let glsl = Fixture::simple(&builder, ShaderStage::Pixel).glsl().source;
        assert!(!glsl.contains("if( activeMaskStackC"));
    }

    fn loop_program() -> ProgramBuilder {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_pop(cf_op::LOOP_START_DX10, 0))
            .cf(1, cf_alu(cf_op::ALU_BREAK, 8, 1))
            .cf(2, cf_pop(cf_op::LOOP_END, 0))
            .cf(3, Export::new(0, 0, 1).done().end().encode())
            .alu(8, &[predicate()]);
        builder
    }

    #[test]
    fn loops_are_capped_by_default() {
        let glsl = Fixture::simple(&loop_program(), ShaderStage::Pixel).glsl().source;
        assert!(glsl.contains("int loopCounter0 = 0;"), "{glsl}");
        assert!(glsl.contains("while( activeMaskStackC[1] == true && loopCounter0 < 500 ) {"));
        assert!(glsl.contains("loopCounter0++;"));
        assert!(glsl.contains("if( predResult == false ) break;"));
    }

    #[test]
    fn loop_cap_can_be_lifted() {
        let options = CompileOptions {
            loop_iteration_cap: None,
            ..CompileOptions::default()
        };
        let fixture = Fixture::build(&loop_program(), ShaderStage::Pixel, RegisterState::default(), options, None, None);
        let glsl = fixture.glsl().source;
        assert!(!glsl.contains("loopCounter"));
        assert!(glsl.contains("while( activeMaskStackC[1] == true ) {"));
    }

    #[test]
    fn pop_restores_outer_level() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_alu(cf_op::ALU_PUSH_BEFORE, 8, 1))
            .cf(1, cf_pop(cf_op::POP, 1))
            .cf(2, Export::new(0, 0, 1).done().end().encode())
            .alu(8, &[predicate()]);
        let glsl = Fixture::simple(&builder, ShaderStage::Pixel).glsl().source;
        assert!(glsl.contains("activeMaskStackC[1] = activeMaskStack[0] == true && activeMaskStackC[0] == true;"), "{glsl}");
    }

    #[test]
    fn subroutine_is_inlined_with_its_own_mask_stack() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_call(4))
            .cf(1, Export::new(0, 0, 1).done().end().encode())
            .cf(4, cf_alu(cf_op::ALU_PUSH_BEFORE, 16, 1))
            .cf(5, cf_pop(cf_op::POP, 1))
            .cf(6, cf_inst(cf_op::RETURN, 0, 1, false))
            .alu(16, &[predicate()]);
        let fixture = Fixture::simple(&builder, ShaderStage::Pixel);
        let glsl = fixture.glsl().source;
        assert!(glsl.contains("activeMaskStackSub0004[0] = true;"), "{glsl}");
        assert!(glsl.contains("activeMaskStackCSub0004[1] = true;"));
        assert!(glsl.contains("activeMaskStackSub0004[1] = predResult;"));
        assert!(glsl.contains("bool activeMaskStackSub0004["));

        let msl = fixture.emit(Dialect::Msl).unwrap().source;
        assert!(msl.contains("activeMaskStackCSub0004[0] = true;"));
    }
}
