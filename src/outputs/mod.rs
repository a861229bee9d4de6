//! Feed output.
//!
//! One Atom document per source, named by the source's `atom_file`:
//!
//! ```text
//! output_dir/
//! ├── hkdiscuss_money.xml
//! ├── hkdiscuss_house.xml
//! ├── hkdiscuss_hottopics.xml
//! ├── hknet.xml
//! └── hkcard.xml
//! ```
//!
//! A document is rewritten only when the run accepted at least one new entry.

pub mod atom;
