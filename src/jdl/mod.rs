//! Job description documents.
//!
//! The engines only need a handful of attribute operations on a job
//! description, so the grammar sits behind [`JobDescription`] and the
//! concrete parser is picked through a [`DescriptionFormat`].

mod classad;

pub use classad::{ClassAd, ClassAdFormat};

use anyhow::Result;

pub trait JobDescription: Send + Sync {
    /// Integer value of an attribute, `None` if absent or not an integer.
    fn get_attribute_int(&self, name: &str) -> Option<i64>;

    /// String value of an attribute with surrounding quotes removed.
    fn get_attribute_string(&self, name: &str) -> Option<String>;

    /// Items of a list expression such as `{"CERN", "FNAL"}`. A scalar value
    /// yields a single item and an absent attribute an empty list.
    fn get_list_from_expression(&self, name: &str) -> Vec<String>;

    fn lookup_attribute(&self, name: &str) -> bool;

    fn insert_attribute_int(&mut self, name: &str, value: i64);

    fn insert_attribute_string(&mut self, name: &str, value: &str);

    /// Insert an expression verbatim, e.g. a nested document or a list.
    fn insert_expression(&mut self, name: &str, expression: &str);

    /// Serialise the whole document back to text.
    fn as_jdl(&self) -> String;
}

pub trait DescriptionFormat: Send + Sync {
    fn parse(&self, text: &str) -> Result<Box<dyn JobDescription>>;

    fn empty(&self) -> Box<dyn JobDescription>;
}

/// Render a list of strings as a list expression.
pub fn list_expression(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|item| format!("\"{}\"", item)).collect();
    format!("{{{}}}", quoted.join(", "))
}
