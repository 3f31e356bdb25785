fn main() -> Result<(), Box<dyn std::error::Error>> {
    foldertalk::cli::main()
}
