pub mod suitability;
