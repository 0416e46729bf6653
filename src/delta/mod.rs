pub mod applier;
pub mod checksum;
pub mod framer;
pub mod generator;
pub mod rolling;

pub use applier::{create_or_append_file, set_mtime_ns, PatchSession};
pub use checksum::{compute_table, BlockChecksum, BlockTable, BLOCK_SIZE};
pub use framer::{pack_generator, pack_op_vec, MAX_CHUNK_SIZE};
pub use generator::{collect_ops, DeltaOp, PatchGenerator};
pub use rolling::RollingChecksum;
