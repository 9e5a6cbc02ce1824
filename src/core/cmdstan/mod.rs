//! Readers for the files CmdStan produces and consumes, and the helpers
//! that turn their flat columns into labelled arrays.

pub mod config;
pub mod dims;
pub mod output;
pub mod rdump;
pub mod unpack;

pub use dims::{dict_to_dataset, generate_dims_coords};
pub use output::read_output;
pub use rdump::read_rdump;
pub use unpack::{base_name, parse_column, unpack_chains, VarDraws};
