mod test_script_sources;
mod test_volume_pipeline;
