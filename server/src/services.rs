pub mod dashservice;
