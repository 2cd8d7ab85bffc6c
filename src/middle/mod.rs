pub mod ir;
pub mod lower;
pub mod ty;
pub mod type_check;
