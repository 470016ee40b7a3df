/*!
Convention-based file system layout and tag keys.

The fundamental idea is a well-known, dataset-relative layout so that
processing stages exchange information through paths and tags instead of a
shared database.
*/

pub mod path;
pub mod tag;
