/*!
Storage layer: the uniform [object store](object) interface and the five
stores built on top of it: the sqlite-backed [journal], the versioned
parquet [statement table](parquet), [tags], [versions] and the dataset
[lock].
*/

pub mod journal;
pub mod lock;
pub mod object;
pub mod parquet;
pub mod tags;
pub mod versions;
