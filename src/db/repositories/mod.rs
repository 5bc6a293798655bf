mod config_blobs;
