//! Lexical services for the interactive editor: the shell tokenizer and the
//! cursor-relative extent locators built on top of it.

pub mod parse_util;
pub mod token;

pub use parse_util::{
    Cmdsubst, CmdsubstSyntaxError, Completeness, cmdsubst_extent, command_completeness,
    compute_indents, job_extent, line_of_offset, locate_cmdsubst, offset_of_line,
    prev_token_extent, process_extent, token_extent, token_extents,
};
pub use token::{
    RedirectKind, Token, TokenError, TokenKind, Tokenizer, TokenizerFlags, tokenize_str,
};
