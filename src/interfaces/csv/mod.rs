pub mod merchant_writer;
