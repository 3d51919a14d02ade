//! Ready-made activities and workflows.
//!
//! - [`poet`]: compose a poem from keywords with an instruction-guided model.
//! - [`linkedin`]: find a company's LinkedIn page and read it into a profile.

pub mod linkedin;
pub mod poet;
