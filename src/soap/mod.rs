//! SOAP documents: element tree, path navigation, envelopes and faults

pub mod element;
pub mod envelope;
pub mod xpath;

pub use element::Element;
pub use envelope::{decode_fault, fault_element, Envelope, SOAP12_NAMESPACE};
pub use xpath::{get_xpath, get_xpath_element, get_xpath_element_mut, set_xpath, XPath};
