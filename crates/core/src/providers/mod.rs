pub mod saxo;
