fn main() {
    obstacle_pipeline::cli::run();
}
