//! Front end for the lesson script dialect

pub mod ast;
pub mod lexer;
pub mod parser;
