use std::collections::HashMap;

use inkwell::{
    builder::{Builder, BuilderError},
    context::Context,
    module::Module,
    types::BasicMetadataTypeEnum,
    values::{BasicMetadataValueEnum, FloatValue, FunctionValue},
    FloatPredicate,
};

use crate::ast::{ASTNode, Expression, Function, Prototype};

/// Symbol given to anonymous top-level expressions so the JIT can find them.
/// LLVM uniquifies repeats (`__anon_expr.1`, ...).
pub const ANONYMOUS_FN: &str = "__anon_expr";

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("unimplemented binary operator `{0}`")]
    UnknownOperator(char),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("invalid number of args in call to `{0}`: expected {1}, found {2}")]
    InvalidCall(String, usize, usize),
    #[error("`{0}` declared with {1} parameters, but an earlier declaration has {2}")]
    ConflictingDeclaration(String, usize, usize),
    #[error("function `{0}` is already defined")]
    Redefined(String),
    #[error("function `{0}` failed verification")]
    InvalidFunction(String),
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

pub struct Codegen<'a> {
    pub context: &'a Context,
    pub module: Module<'a>,
    pub builder: Builder<'a>,
    named_values: HashMap<String, FloatValue<'a>>,
}

impl<'a> Codegen<'a> {
    pub fn new(context: &'a Context) -> Codegen<'a> {
        let module = context.create_module("ember");
        let builder = context.create_builder();

        Codegen {
            context,
            module,
            builder,
            named_values: HashMap::new(),
        }
    }

    /// Compile one top-level construct into the module.
    pub fn compile(&mut self, node: &ASTNode) -> Result<FunctionValue<'a>, CodegenError> {
        match node {
            ASTNode::Function(func) => self.compile_fn(func),
            ASTNode::Extern(proto) => self.compile_proto(proto),
        }
    }

    fn codegen_expr(&mut self, expr: &Expression) -> Result<FloatValue<'a>, CodegenError> {
        match expr {
            Expression::Number(value) => Ok(self.context.f64_type().const_float(*value)),
            Expression::Variable(name) => self
                .named_values
                .get(name)
                .copied()
                .ok_or_else(|| CodegenError::UnknownVariable(name.clone())),
            Expression::Binary(op, left, right) => {
                let lhs = self.codegen_expr(left)?;
                let rhs = self.codegen_expr(right)?;

                match op {
                    '+' => Ok(self.builder.build_float_add(lhs, rhs, "addtmp")?),
                    '-' => Ok(self.builder.build_float_sub(lhs, rhs, "subtmp")?),
                    '*' => Ok(self.builder.build_float_mul(lhs, rhs, "multmp")?),
                    '/' => Ok(self.builder.build_float_div(lhs, rhs, "divtmp")?),
                    // comparisons produce bool-as-double, the language's only type
                    '<' => {
                        let cmp = self
                            .builder
                            .build_float_compare(FloatPredicate::ULT, lhs, rhs, "lttmp")?;
                        Ok(self.builder.build_unsigned_int_to_float(
                            cmp,
                            self.context.f64_type(),
                            "booltmp",
                        )?)
                    }
                    '>' => {
                        let cmp = self
                            .builder
                            .build_float_compare(FloatPredicate::UGT, lhs, rhs, "gttmp")?;
                        Ok(self.builder.build_unsigned_int_to_float(
                            cmp,
                            self.context.f64_type(),
                            "booltmp",
                        )?)
                    }
                    op => Err(CodegenError::UnknownOperator(*op)),
                }
            }
            Expression::Call(callee, args) => {
                let func = self
                    .module
                    .get_function(callee)
                    .ok_or_else(|| CodegenError::UnknownFunction(callee.clone()))?;

                let expected = func.count_params() as usize;
                if expected != args.len() {
                    return Err(CodegenError::InvalidCall(
                        callee.clone(),
                        expected,
                        args.len(),
                    ));
                }

                let mut compiled_args: Vec<BasicMetadataValueEnum> =
                    Vec::with_capacity(args.len());
                for arg in args {
                    compiled_args.push(self.codegen_expr(arg)?.into());
                }

                let value = self
                    .builder
                    .build_call(func, &compiled_args, "calltmp")?
                    .try_as_basic_value()
                    .left()
                    .expect("a call to a double-returning function must produce a value");
                Ok(value.into_float_value())
            }
        }
    }

    /// Declare a function taking and returning doubles, or fetch the existing
    /// declaration of the same name. A parameter-count mismatch with the
    /// earlier declaration is rejected.
    fn compile_proto(&self, proto: &Prototype) -> Result<FunctionValue<'a>, CodegenError> {
        if !proto.is_anonymous() {
            if let Some(existing) = self.module.get_function(&proto.name) {
                let declared = existing.count_params() as usize;
                if declared != proto.args.len() {
                    return Err(CodegenError::ConflictingDeclaration(
                        proto.name.clone(),
                        proto.args.len(),
                        declared,
                    ));
                }
                return Ok(existing);
            }
        }

        let f64_type = self.context.f64_type();
        let args_types = std::iter::repeat(f64_type.into())
            .take(proto.args.len())
            .collect::<Vec<BasicMetadataTypeEnum>>();
        let fn_type = f64_type.fn_type(&args_types, false);

        let symbol = if proto.is_anonymous() {
            ANONYMOUS_FN
        } else {
            proto.name.as_str()
        };
        let fn_val = self.module.add_function(symbol, fn_type, None);

        for (param, name) in fn_val.get_param_iter().zip(&proto.args) {
            param.into_float_value().set_name(name);
        }

        Ok(fn_val)
    }

    fn compile_fn(&mut self, function: &Function) -> Result<FunctionValue<'a>, CodegenError> {
        let Function {
            prototype: proto,
            body,
        } = function;
        let fn_val = self.compile_proto(proto)?;

        if fn_val.count_basic_blocks() > 0 {
            return Err(CodegenError::Redefined(proto.name.clone()));
        }

        let entry = self.context.append_basic_block(fn_val, "entry");
        self.builder.position_at_end(entry);

        // bind parameters under the definition's own names; a reused extern
        // declaration may have declared different ones
        self.named_values.clear();
        for (param, name) in fn_val.get_param_iter().zip(&proto.args) {
            let param = param.into_float_value();
            param.set_name(name);
            self.named_values.insert(name.clone(), param);
        }

        let ret = match self.codegen_expr(body) {
            Ok(ret) => ret,
            Err(err) => {
                // drop the half-built function so the name stays free for a
                // later attempt
                unsafe {
                    fn_val.delete();
                }
                return Err(err);
            }
        };
        self.builder.build_return(Some(&ret))?;

        if fn_val.verify(true) {
            Ok(fn_val)
        } else {
            unsafe {
                fn_val.delete();
            }
            Err(CodegenError::InvalidFunction(proto.name.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use inkwell::context::Context;

    use super::{Codegen, CodegenError, ANONYMOUS_FN};
    use crate::ast::{ASTNode, Expression, Function, Prototype};
    use crate::parser::Parser;

    fn parse(input: &str) -> Vec<ASTNode> {
        Parser::default().parse_str(input).unwrap()
    }

    fn compile_all<'a>(
        codegen: &mut Codegen<'a>,
        input: &str,
    ) -> Result<Vec<inkwell::values::FunctionValue<'a>>, CodegenError> {
        parse(input)
            .iter()
            .map(|node| codegen.compile(node))
            .collect()
    }

    #[test]
    fn definition_compiles_and_verifies() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        compile_all(&mut codegen, "def add(a, b) a + b").unwrap();

        assert!(codegen.module.get_function("add").is_some());
        let ir = codegen.module.print_to_string().to_string();
        assert!(ir.contains("fadd"), "expected an fadd in:\n{}", ir);
    }

    #[test]
    fn anonymous_expression_gets_the_anonymous_symbol() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        let funcs = compile_all(&mut codegen, "1 + 2 * 3").unwrap();

        assert_eq!(funcs.len(), 1);
        assert_eq!(funcs[0].get_name().to_bytes(), ANONYMOUS_FN.as_bytes());
    }

    #[test]
    fn comparisons_widen_back_to_double() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        compile_all(&mut codegen, "def lt(a, b) a < b").unwrap();

        let ir = codegen.module.print_to_string().to_string();
        assert!(ir.contains("fcmp ult"), "expected fcmp ult in:\n{}", ir);
        assert!(ir.contains("uitofp"), "expected uitofp in:\n{}", ir);
    }

    #[test]
    fn unknown_variable_discards_the_function() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);

        let err = compile_all(&mut codegen, "def f(x) y").unwrap_err();
        assert!(matches!(err, CodegenError::UnknownVariable(ref name) if name == "y"));
        assert!(codegen.module.get_function("f").is_none());

        // the broken stub must not block a later definition
        compile_all(&mut codegen, "def f(x) x").unwrap();
        assert!(codegen.module.get_function("f").is_some());
    }

    #[test]
    fn calling_an_undeclared_function_fails() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);

        let err = compile_all(&mut codegen, "bar(1, 2)").unwrap_err();
        assert!(matches!(err, CodegenError::UnknownFunction(ref name) if name == "bar"));
        assert!(codegen.module.get_function(ANONYMOUS_FN).is_none());
    }

    #[test]
    fn call_arity_must_match_the_declaration() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        compile_all(&mut codegen, "def foo(a, b) a + b").unwrap();

        let err = compile_all(&mut codegen, "foo(1)").unwrap_err();
        assert!(matches!(err, CodegenError::InvalidCall(ref name, 2, 1) if name == "foo"));
        let err = compile_all(&mut codegen, "foo(1, 2, 3)").unwrap_err();
        assert!(matches!(err, CodegenError::InvalidCall(ref name, 2, 3) if name == "foo"));

        compile_all(&mut codegen, "foo(1, 2)").unwrap();
    }

    #[test]
    fn extern_then_def_share_one_function() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        compile_all(&mut codegen, "extern cos(theta); def cos(x) x").unwrap();

        let named = codegen
            .module
            .get_functions()
            .filter(|f| f.get_name().to_bytes() == b"cos")
            .count();
        assert_eq!(named, 1);

        // the body bound the def's parameter name, not the extern's
        let ir = codegen.module.print_to_string().to_string();
        assert!(ir.contains("%x"), "expected parameter %x in:\n{}", ir);
    }

    #[test]
    fn redeclaration_with_different_arity_is_rejected() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        compile_all(&mut codegen, "extern f(a, b)").unwrap();

        let err = compile_all(&mut codegen, "def f(a) a").unwrap_err();
        assert!(matches!(err, CodegenError::ConflictingDeclaration(ref name, 1, 2) if name == "f"));
    }

    #[test]
    fn redefining_a_function_body_is_rejected() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        compile_all(&mut codegen, "def f(x) x").unwrap();

        let err = compile_all(&mut codegen, "def f(x) x + 1").unwrap_err();
        assert!(matches!(err, CodegenError::Redefined(ref name) if name == "f"));
    }

    #[test]
    fn duplicate_parameter_names_bind_last_wins() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        compile_all(&mut codegen, "def dup(x, x) x").unwrap();
        assert!(codegen.module.get_function("dup").is_some());
    }

    #[test]
    fn operators_outside_the_language_fail_generation() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);

        let node = ASTNode::Function(Function {
            prototype: Prototype {
                name: "rem".to_string(),
                args: vec!["a".to_string(), "b".to_string()],
            },
            body: Expression::Binary(
                '%',
                Box::new(Expression::Variable("a".to_string())),
                Box::new(Expression::Variable("b".to_string())),
            ),
        });
        let err = codegen.compile(&node).unwrap_err();
        assert!(matches!(err, CodegenError::UnknownOperator('%')));
        assert!(codegen.module.get_function("rem").is_none());
    }

    #[test]
    fn session_continues_across_generation_failures() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);

        assert!(compile_all(&mut codegen, "def f(x) missing(x)").is_err());
        compile_all(&mut codegen, "def missing(x) x; def f(x) missing(x)").unwrap();

        let ir = codegen.module.print_to_string().to_string();
        assert!(ir.contains("call double @missing"), "in:\n{}", ir);
    }
}
