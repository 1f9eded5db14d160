pub mod order;
pub mod order_line;
pub mod payment;
pub mod product;
pub mod supplier;
