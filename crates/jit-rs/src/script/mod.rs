//! Front end for a small indentation-based scripting language.
//!
//! Source text is tokenized, parsed into a [`tree`], and compiled into
//! methods of a [`Module`]. Free names are looked up through a [`Resolver`]
//! after the local environment.

mod compiler;
mod lexer;
mod parser;
mod sugared;
pub mod tree;

pub use compiler::{
    compile_function, define_methods_from_source, define_methods_in_module,
    define_module_methods, CompileError, Emitter, MemberInput, Method, Module,
};
pub use lexer::{tokenize, Token, TokenKind};
pub use parser::{parse_expression, parse_program, ParseError, Parser};
pub use sugared::{builtin_resolver, BuiltinFunction, ModuleValue, Resolver, SimpleValue, SugaredValue};
