// Domain layer - Machine state model and pure accounting rules
pub mod accounting;
pub mod addressing;
pub mod history;
pub mod machine;
