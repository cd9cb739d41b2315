//! Adapters between the outside world and the workflow: a JSON-lines
//! command script on the way in and a CSV merchant summary on the way out.

pub mod csv;
pub mod jsonl;
pub mod script;
