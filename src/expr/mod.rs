//! Small C-like expression language, compiled into a reactive DAG
//!
//! Grounded on `python/archiver/expression.py`'s PLY-based lexer/parser and
//! `Node`/`EvalNode`/`When` class hierarchy, reworked as a tagged union
//! (`Node`) evaluated by a single top-down dispatch instead of a class
//! hierarchy with parent pointers, per the design notes.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::Node;
pub use parser::Parser;
