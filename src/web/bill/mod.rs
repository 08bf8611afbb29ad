pub mod data;
pub mod list_view;
pub mod new_bill;
pub mod ssr;
