pub mod offerings;
