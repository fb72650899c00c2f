mod ast;
mod codegen;
mod lexer;
mod parser;

use std::{fs, io::Read, path::PathBuf};

use anyhow::{anyhow, Context as _};
use clap::Parser as _;
use codegen::Codegen;
use inkwell::{context::Context, execution_engine::JitFunction, OptimizationLevel};
use parser::Parser;

type AnonFn = unsafe extern "C" fn() -> f64;

#[derive(clap::Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Source file to compile; reads standard input when omitted
    file: Option<PathBuf>,

    /// Only print the generated IR, skipping the JIT run of top-level
    /// expressions
    #[arg(long)]
    no_run: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let source = match &args.file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let mut tokens = lexer::lex(&source)?;
    let parser = Parser::default();

    let context = Context::create();
    let mut codegen = Codegen::new(&context);

    let mut anonymous = Vec::new();
    while !tokens.is_empty() {
        let node = match parser.parse_top_level(&mut tokens) {
            Ok(Some(node)) => node,
            Ok(None) => continue, // a lone `;`
            Err(err) => {
                eprintln!("error: {}", err);
                // skip one token and resume at the next construct
                tokens.pop();
                continue;
            }
        };

        let is_anonymous =
            matches!(&node, ast::ASTNode::Function(func) if func.prototype.is_anonymous());
        match codegen.compile(&node) {
            Ok(func) if is_anonymous => anonymous.push(func),
            Ok(_) => {}
            Err(err) => eprintln!("error: {}", err),
        }
    }

    println!("{}", codegen.module.print_to_string().to_string());

    if args.no_run || anonymous.is_empty() {
        return Ok(());
    }

    let engine = codegen
        .module
        .create_jit_execution_engine(OptimizationLevel::None)
        .map_err(|e| anyhow!("failed to create jit engine: {}", e))?;

    for func in anonymous {
        let name = func.get_name().to_str()?;
        let compiled: JitFunction<AnonFn> = unsafe { engine.get_function(name)? };
        println!("=> {}", unsafe { compiled.call() });
    }

    Ok(())
}
