pub mod audit;
pub mod payment_flow;
pub mod refund_flow;
pub mod tier;
pub mod worker;
