//! Minimal ERC-20 bindings for the deposit token

use ethers::contract::abigen;

abigen!(
    Erc20,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
        function transfer(address to, uint256 amount) external returns (bool)
    ]"#
);
