use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use gpu7_isa::{RegisterState, ShaderStage};
use gpu7_shader::{CompileOptions, Dialects, ShaderCompiler, ShaderInput};

fn usage() -> &'static str {
    "\
gpu7_dump: decompile GPU7 shader microcode with default register state

USAGE:
    cargo run -p gpu7-shader --bin gpu7_dump -- <microcode.bin> [--stage vs|ps|gs] [--msl] [--glsl]

FLAGS:
    --stage S         Shader stage of the microcode (default vs)
    --copy-shader P   Copy shader microcode, required for --stage gs
    --with-gs         Compile a vertex or pixel shader for a pipeline with a geometry shader
    --glsl            Emit GLSL (default when no dialect flag is given)
    --msl             Emit MSL
    --strict-mul      Use the zero-preserving multiply
"
}

fn parse_stage(value: &str) -> anyhow::Result<ShaderStage> {
    Ok(match value {
        "vs" | "vertex" => ShaderStage::Vertex,
        "ps" | "pixel" => ShaderStage::Pixel,
        "gs" | "geometry" => ShaderStage::Geometry,
        _ => bail!("unknown stage {value:?}"),
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = real_main() {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn real_main() -> anyhow::Result<()> {
    let mut path: Option<PathBuf> = None;
    let mut copy_shader_path: Option<PathBuf> = None;
    let mut stage = ShaderStage::Vertex;
    let mut dialects = Dialects::empty();
    let mut options = CompileOptions::default();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print!("{}", usage());
                return Ok(());
            }
            "--stage" => {
                let Some(v) = args.next() else {
                    bail!("--stage requires a value");
                };
                stage = parse_stage(&v)?;
            }
            "--copy-shader" => {
                let Some(v) = args.next() else {
                    bail!("--copy-shader requires a path");
                };
                copy_shader_path = Some(PathBuf::from(v));
            }
            "--with-gs" => options.uses_geometry_shader = true,
            "--glsl" => dialects |= Dialects::GLSL,
            "--msl" => dialects |= Dialects::MSL,
            "--strict-mul" => options.strict_mul = true,
            _ if arg.starts_with("--stage=") => stage = parse_stage(&arg["--stage=".len()..])?,
            _ if arg.starts_with('-') => {
                bail!("unknown option {arg:?}\n\n{}", usage());
            }
            _ => {
                if path.is_some() {
                    bail!("unexpected positional argument {arg:?}\n\n{}", usage());
                }
                path = Some(PathBuf::from(arg));
            }
        }
    }

    let Some(path) = path else {
        bail!("missing microcode input path\n\n{}", usage());
    };
    if !dialects.is_empty() {
        options.dialects = dialects;
    }
    if stage == ShaderStage::Geometry {
        options.uses_geometry_shader = true;
    }

    let microcode = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let copy_shader = match &copy_shader_path {
        Some(path) => Some(fs::read(path).with_context(|| format!("failed to read {}", path.display()))?),
        None => None,
    };

    let regs = RegisterState::default();
    let mut input = ShaderInput::new(stage, &microcode, &regs);
    input.copy_shader = copy_shader.as_deref();

    let compiler = ShaderCompiler::new(options);
    let shader = compiler
        .compile(&input)
        .with_context(|| format!("failed to compile {}", path.display()))?;

    println!("// {stage} shader {:016x}, has_error={}", shader.hash, shader.has_error);
    for diagnostic in &shader.diagnostics {
        println!("// {diagnostic}");
    }
    if let Some(glsl) = &shader.glsl {
        println!("{glsl}");
    }
    if let Some(msl) = &shader.msl {
        println!("{msl}");
    }
    println!("// bindings: {:#?}", shader.bindings);
    println!("// uniform offsets: {:#?}", shader.uniform_offsets);
    Ok(())
}
