pub mod world_state;
