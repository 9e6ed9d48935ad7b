tonic::include_proto!("dash");
